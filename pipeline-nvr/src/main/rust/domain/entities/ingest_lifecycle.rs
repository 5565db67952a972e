use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::value_objects::IngestState;

/// Supervisory state of one channel and the figures the status listing
/// reports about it
#[derive(Debug)]
pub struct IngestLifecycle {
    state: IngestState,
    streaming_since: Option<Instant>,
    failures: u32,
    last_error: Option<String>,
}

/// Serializable view of an [`IngestLifecycle`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSnapshot {
    pub state: IngestState,
    /// Seconds since the current session started streaming
    pub uptime_secs: Option<u64>,
    /// Sessions that ended and were retried since the loop started
    pub failures: u32,
    pub last_error: Option<String>,
}

impl IngestLifecycle {
    pub fn new() -> Self {
        Self {
            state: IngestState::Idle,
            streaming_since: None,
            failures: 0,
            last_error: None,
        }
    }

    pub fn current_state(&self) -> IngestState {
        self.state
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.streaming_since.map(|start| start.elapsed())
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A fresh supervisory loop forgets the previous one's failures
    pub fn transition_to_connecting(&mut self) {
        if matches!(self.state, IngestState::Idle | IngestState::Stopped) {
            self.failures = 0;
            self.last_error = None;
        }
        self.streaming_since = None;
        self.state = IngestState::Connecting;
    }

    pub fn transition_to_streaming(&mut self) {
        self.state = IngestState::Streaming;
        self.streaming_since = Some(Instant::now());
    }

    pub fn transition_to_backoff(&mut self, attempt: u32, reason: String) {
        self.streaming_since = None;
        self.failures += 1;
        self.last_error = Some(reason);
        self.state = IngestState::Backoff { attempt };
    }

    pub fn transition_to_stopped(&mut self) {
        self.streaming_since = None;
        self.state = IngestState::Stopped;
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            state: self.state,
            uptime_secs: self.uptime().map(|uptime| uptime.as_secs()),
            failures: self.failures,
            last_error: self.last_error.clone(),
        }
    }
}

impl Default for IngestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
