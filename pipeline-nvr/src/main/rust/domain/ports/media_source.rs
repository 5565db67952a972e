use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::Result;
use crate::domain::value_objects::{CodecParameters, MediaPacket};

#[derive(Debug, Clone, PartialEq)]
pub struct DialRequest {
    pub url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub audio: bool,
    pub debug: bool,
    pub insecure_skip_verify: bool,
}

/// What the transport reports after a successful dial
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Codecs became known after the dial returned
    CodecReady(CodecParameters),
    /// Source renegotiated mid-session
    CodecUpdated(CodecParameters),
    Packet(MediaPacket),
    /// Transport ended, with a reason
    Stopped(String),
}

/// Live upstream connection. Dropping it tells the transport to stop.
#[derive(Debug)]
pub struct UpstreamSession {
    pub codecs: Option<CodecParameters>,
    pub events: mpsc::Receiver<UpstreamEvent>,
    running: Arc<AtomicBool>,
}

impl UpstreamSession {
    pub fn new(
        codecs: Option<CodecParameters>,
        events: mpsc::Receiver<UpstreamEvent>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            codecs,
            events,
            running,
        }
    }

    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for UpstreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Port for the RTSP/RTMP transport library
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn dial(&self, request: DialRequest) -> Result<UpstreamSession>;
}
