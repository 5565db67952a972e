use lazy_static::lazy_static;
use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::domain::ports::MetricsReporter;
use crate::domain::value_objects::{ChannelKey, ExitReason, IngestState, SessionExit};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CHANNELS_ONLINE: IntGauge = IntGauge::new(
        "nvr_channels_online",
        "Number of channels with a connected upstream"
    ).expect("metric can be created");
    pub static ref CLIENTS_ATTACHED: IntGauge = IntGauge::new(
        "nvr_clients_attached",
        "Number of clients attached to live channels"
    ).expect("metric can be created");
    pub static ref RECORDINGS_ACTIVE: IntGauge = IntGauge::new(
        "nvr_recordings_active",
        "Number of running encoder processes"
    ).expect("metric can be created");
    pub static ref INGEST_STATE: GaugeVec = GaugeVec::new(
        Opts::new(
            "nvr_ingest_state",
            "Ingest state per channel (0=idle, 1=connecting, 2=streaming, 3=backoff, 4=stopped)"
        ),
        &["channel"]
    ).expect("metric can be created");
    pub static ref INGEST_SESSIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("nvr_ingest_sessions_total", "Ended ingest sessions by exit reason"),
        &["exit"]
    ).expect("metric can be created");
    pub static ref RECORDING_EXITS: IntCounterVec = IntCounterVec::new(
        Opts::new("nvr_recording_exits_total", "Encoder exits by classified reason"),
        &["reason"]
    ).expect("metric can be created");
    pub static ref RETENTION_DELETED_FOLDERS: IntCounter = IntCounter::new(
        "nvr_retention_deleted_folders_total",
        "Day folders removed by the retention sweeper"
    ).expect("metric can be created");
    pub static ref RETENTION_DELETED_BYTES: IntCounter = IntCounter::new(
        "nvr_retention_deleted_bytes_total",
        "Bytes removed by the retention sweeper"
    ).expect("metric can be created");
}

pub struct PrometheusReporter;

impl PrometheusReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn init_metrics() -> Result<(), prometheus::Error> {
        REGISTRY.register(Box::new(CHANNELS_ONLINE.clone()))?;
        REGISTRY.register(Box::new(CLIENTS_ATTACHED.clone()))?;
        REGISTRY.register(Box::new(RECORDINGS_ACTIVE.clone()))?;
        REGISTRY.register(Box::new(INGEST_STATE.clone()))?;
        REGISTRY.register(Box::new(INGEST_SESSIONS.clone()))?;
        REGISTRY.register(Box::new(RECORDING_EXITS.clone()))?;
        REGISTRY.register(Box::new(RETENTION_DELETED_FOLDERS.clone()))?;
        REGISTRY.register(Box::new(RETENTION_DELETED_BYTES.clone()))?;
        Ok(())
    }

    pub fn gather_metrics() -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return b"# Error encoding metrics\n".to_vec();
        }
        buffer
    }
}

impl Default for PrometheusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsReporter for PrometheusReporter {
    fn report_ingest_state(&self, key: &ChannelKey, state: &IngestState) {
        let channel = key.to_string();
        INGEST_STATE
            .with_label_values(&[channel.as_str()])
            .set(state.as_metric());
    }

    fn report_channel_online(&self, _key: &ChannelKey, online: bool) {
        if online {
            CHANNELS_ONLINE.inc();
        } else {
            CHANNELS_ONLINE.dec();
        }
    }

    fn report_session_exit(&self, _key: &ChannelKey, exit: &SessionExit) {
        INGEST_SESSIONS.with_label_values(&[exit.as_label()]).inc();
    }

    fn report_clients(&self, delta: i64) {
        CLIENTS_ATTACHED.add(delta);
    }

    fn report_recording_started(&self, _key: &ChannelKey) {
        RECORDINGS_ACTIVE.inc();
    }

    fn report_recording_exit(&self, _key: &ChannelKey, reason: &ExitReason) {
        RECORDINGS_ACTIVE.dec();
        RECORDING_EXITS.with_label_values(&[reason.as_str()]).inc();
    }

    fn report_retention_deleted(&self, folders: u64, bytes: u64) {
        RETENTION_DELETED_FOLDERS.inc_by(folders);
        RETENTION_DELETED_BYTES.inc_by(bytes);
    }
}
