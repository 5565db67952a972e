mod channel_runtime;
mod client;
mod day_folder;
mod fps_probe;
mod hls_segment_buffer;
mod ingest_lifecycle;
mod low_latency_muxer;
mod process_lifecycle;
mod recording;
mod signal_queue;

pub use channel_runtime::ChannelRuntime;
pub use client::{client_pair, ClientHandle, ClientSubscription, Delivery, DEFAULT_CLIENT_QUEUE};
pub use day_folder::{total_size, DayFolder};
pub use fps_probe::FpsProbe;
pub use hls_segment_buffer::{
    HlsSegmentBuffer, MediaPlaylist, Segment, DEFAULT_WINDOW, MIN_READY_SEGMENTS,
};
pub use ingest_lifecycle::{IngestLifecycle, IngestSnapshot};
pub use low_latency_muxer::{LowLatencyMuxer, Part};
pub use process_lifecycle::{ProcessLifecycle, ProcessState};
pub use recording::{Recording, RecordingControl, RecordingInfo};
pub use signal_queue::{SignalQueue, DEFAULT_SIGNAL_CAPACITY};
