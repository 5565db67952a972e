mod gstreamer_muxer;
mod gstreamer_source;
mod pipeline_builder;

pub use gstreamer_muxer::GStreamerMuxer;
pub use gstreamer_source::GStreamerSource;
pub use pipeline_builder::PipelineBuilder;
