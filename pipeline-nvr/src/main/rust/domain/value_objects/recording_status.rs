use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Starting,
    On,
    Off,
    Error,
}

impl RecordingStatus {
    /// Starting and On both block a second start for the same key
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::On)
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Classified cause of an encoder process exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    UserStopped,
    ScheduledRestart,
    ProcessError,
    Timeout,
    Unknown,
}

impl ExitReason {
    /// Classify from the user-stop flag and the observed exit.
    /// `exit_ok` is `None` when the exit status could not be read.
    pub fn classify(stopped_by_user: bool, timed_out: bool, exit_ok: Option<bool>) -> Self {
        if stopped_by_user {
            return Self::UserStopped;
        }
        if timed_out {
            return Self::Timeout;
        }
        match exit_ok {
            Some(true) => Self::ScheduledRestart,
            Some(false) => Self::ProcessError,
            None => Self::Unknown,
        }
    }

    pub fn should_restart(&self) -> bool {
        matches!(self, Self::ScheduledRestart | Self::ProcessError | Self::Timeout)
    }

    /// Abnormal exits flip the recording to Error until the restart lands
    pub fn is_abnormal(&self) -> bool {
        matches!(self, Self::ProcessError | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserStopped => "user_stopped",
            Self::ScheduledRestart => "scheduled_restart",
            Self::ProcessError => "process_error",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
