#[cfg(feature = "gstreamer")]
pub mod gstreamer;
pub mod metrics;
pub mod process;
pub mod storage;
