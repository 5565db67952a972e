pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-exports for convenience
pub use application::services::{
    ArchiveService, CaptureService, CaptureSettings, ChannelRegistry, HlsService, HlsSettings,
    IngestService, IngestSettings, MaintenanceService, RecorderSettings, RecordingService,
    RegistrySettings, RetentionSweeper, SweepReport, SweepRule,
};
pub use config::Config;
pub use domain::entities::{DayFolder, IngestLifecycle, IngestSnapshot, Recording, RecordingInfo};
pub use domain::errors::{DomainError, Result};
pub use domain::ports::{
    Clock, ContainerMuxer, DayFolderStore, DiskSpace, EncoderLauncher, KeyStore, MediaSource,
    MetricsReporter, NoopMetrics, SystemClock,
};
pub use domain::value_objects::{
    ChannelConfig, ChannelKey, ChannelSignal, ChannelStatus, ClientMode,
    EncoderCommand, ExitReason, RecordingLayout, RecordingStatus, RetentionPolicy, StreamConfig,
};
#[cfg(feature = "gstreamer")]
pub use infrastructure::gstreamer::{GStreamerMuxer, GStreamerSource, PipelineBuilder};
pub use infrastructure::metrics::{serve_metrics, PrometheusReporter};
pub use infrastructure::process::FfmpegLauncher;
pub use infrastructure::storage::{FileKeyStore, FsDayFolderStore, SysinfoDiskSpace};
