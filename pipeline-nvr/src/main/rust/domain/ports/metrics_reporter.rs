use crate::domain::value_objects::{ChannelKey, ExitReason, IngestState, SessionExit};

/// Port for metrics reporting
pub trait MetricsReporter: Send + Sync {
    fn report_ingest_state(&self, key: &ChannelKey, state: &IngestState);
    fn report_channel_online(&self, key: &ChannelKey, online: bool);
    fn report_session_exit(&self, key: &ChannelKey, exit: &SessionExit);
    fn report_clients(&self, delta: i64);
    fn report_recording_started(&self, key: &ChannelKey);
    fn report_recording_exit(&self, key: &ChannelKey, reason: &ExitReason);
    fn report_retention_deleted(&self, folders: u64, bytes: u64);
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsReporter for NoopMetrics {
    fn report_ingest_state(&self, _key: &ChannelKey, _state: &IngestState) {}
    fn report_channel_online(&self, _key: &ChannelKey, _online: bool) {}
    fn report_session_exit(&self, _key: &ChannelKey, _exit: &SessionExit) {}
    fn report_clients(&self, _delta: i64) {}
    fn report_recording_started(&self, _key: &ChannelKey) {}
    fn report_recording_exit(&self, _key: &ChannelKey, _reason: &ExitReason) {}
    fn report_retention_deleted(&self, _folders: u64, _bytes: u64) {}
}
