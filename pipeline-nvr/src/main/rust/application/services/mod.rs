mod archive_service;
mod capture_service;
mod channel_registry;
mod hls_service;
mod ingest_service;
mod maintenance_service;
mod recording_service;
mod retention;

pub use archive_service::{ArchiveService, RecordingEntry, FIND_TIME_FORMAT};
pub use capture_service::{CaptureService, CaptureSettings};
pub use channel_registry::{ChannelRegistry, ChannelSummary, RegistrySettings, StreamSummary};
pub use hls_service::{HlsService, HlsSettings};
pub use ingest_service::{IngestService, IngestSettings};
pub use maintenance_service::MaintenanceService;
pub use recording_service::{RecorderSettings, RecordingService, ENCODER_LOG};
pub use retention::{DeletedFolder, RetentionSweeper, SweepReport, SweepRule};
