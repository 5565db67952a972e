mod clock;
mod container_muxer;
mod day_folder_store;
mod disk_space;
mod encoder_launcher;
mod key_store;
mod media_source;
mod metrics_reporter;

pub use clock::{Clock, SystemClock};
pub use container_muxer::{ContainerMuxer, FragmentedMp4};
pub use day_folder_store::DayFolderStore;
pub use disk_space::DiskSpace;
pub use encoder_launcher::{EncoderInput, EncoderLauncher, EncoderOutput, EncoderProcess, ProcessExit};
pub use key_store::KeyStore;
pub use media_source::{DialRequest, MediaSource, UpstreamEvent, UpstreamSession};
pub use metrics_reporter::{MetricsReporter, NoopMetrics};
