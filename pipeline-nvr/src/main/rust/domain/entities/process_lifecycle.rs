use std::fmt;

use crate::domain::value_objects::ExitReason;

/// Lifecycle of one supervised encoder process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    /// Quit command written, waiting for the process to flush
    StoppingGraceful,
    /// Watchdog fired, process is being killed
    StoppingForced,
    Exited(ExitReason),
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::StoppingGraceful => write!(f, "stopping_graceful"),
            Self::StoppingForced => write!(f, "stopping_forced"),
            Self::Exited(reason) => write!(f, "exited ({})", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessLifecycle {
    state: ProcessState,
}

impl ProcessLifecycle {
    pub fn new() -> Self {
        Self {
            state: ProcessState::Starting,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn mark_running(&mut self) {
        if self.state == ProcessState::Starting {
            self.state = ProcessState::Running;
        }
    }

    /// Returns false when a stop is already underway or the process is gone
    pub fn begin_graceful_stop(&mut self) -> bool {
        match self.state {
            ProcessState::Starting | ProcessState::Running => {
                self.state = ProcessState::StoppingGraceful;
                true
            }
            _ => false,
        }
    }

    pub fn begin_forced_stop(&mut self) -> bool {
        match self.state {
            ProcessState::Exited(_) | ProcessState::StoppingForced => false,
            _ => {
                self.state = ProcessState::StoppingForced;
                true
            }
        }
    }

    pub fn mark_exited(&mut self, reason: ExitReason) {
        self.state = ProcessState::Exited(reason);
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        match self.state {
            ProcessState::Exited(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Default for ProcessLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
