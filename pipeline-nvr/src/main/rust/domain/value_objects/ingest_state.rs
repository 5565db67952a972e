use std::fmt;

use serde::Serialize;

/// Supervisory loop states of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    /// No supervisory task owns the channel
    #[default]
    Idle,
    /// Dialing the upstream source
    Connecting,
    /// Receiving and distributing packets
    Streaming,
    /// Waiting before the next dial
    Backoff { attempt: u32 },
    /// Loop ended for good
    Stopped,
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Streaming => write!(f, "STREAMING"),
            Self::Backoff { attempt } => write!(f, "BACKOFF (attempt {})", attempt),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl IngestState {
    pub fn as_metric(&self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Connecting => 1.0,
            Self::Streaming => 2.0,
            Self::Backoff { .. } => 3.0,
            Self::Stopped => 4.0,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn is_problematic(&self) -> bool {
        matches!(self, Self::Backoff { .. })
    }
}
