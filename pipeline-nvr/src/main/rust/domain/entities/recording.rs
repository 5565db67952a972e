use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::{ProcessLifecycle, ProcessState};
use crate::domain::value_objects::{ChannelKey, ExitReason, RecordingStatus};

/// One encoder supervision record.
///
/// Shared between the recordings map and the monitor task that owns the
/// process. The monitor holds the matching [`RecordingControl`].
#[derive(Debug)]
pub struct Recording {
    key: ChannelKey,
    stream_name: String,
    session_id: String,
    started_at: DateTime<Local>,
    directory: PathBuf,
    playlist: PathBuf,
    state: Mutex<RecordingState>,
    stopped_by_user: AtomicBool,
    stop_tx: mpsc::Sender<()>,
    done_rx: watch::Receiver<bool>,
}

#[derive(Debug)]
struct RecordingState {
    status: RecordingStatus,
    ended_at: Option<DateTime<Local>>,
    process: ProcessLifecycle,
}

/// Monitor-side half: stop requests in, completion out
#[derive(Debug)]
pub struct RecordingControl {
    pub stop_rx: mpsc::Receiver<()>,
    done_tx: watch::Sender<bool>,
}

impl RecordingControl {
    /// Signal full cleanup. Consumes the control so it happens once.
    pub fn finish(self) {
        let _ = self.done_tx.send(true);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub stream_id: String,
    pub channel_id: String,
    pub session_id: String,
    pub status: RecordingStatus,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub playlist: PathBuf,
}

impl Recording {
    pub fn new(
        key: ChannelKey,
        stream_name: impl Into<String>,
        session_id: impl Into<String>,
        started_at: DateTime<Local>,
        directory: PathBuf,
        playlist: PathBuf,
    ) -> (Self, RecordingControl) {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = watch::channel(false);
        let recording = Self {
            key,
            stream_name: stream_name.into(),
            session_id: session_id.into(),
            started_at,
            directory,
            playlist,
            state: Mutex::new(RecordingState {
                status: RecordingStatus::Starting,
                ended_at: None,
                process: ProcessLifecycle::new(),
            }),
            stopped_by_user: AtomicBool::new(false),
            stop_tx,
            done_rx,
        };
        (recording, RecordingControl { stop_rx, done_tx })
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn playlist(&self) -> &Path {
        &self.playlist
    }

    pub fn status(&self) -> RecordingStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: RecordingStatus) {
        self.state.lock().status = status;
    }

    /// Move to `to` only while the status is still `from`
    pub fn transition(&self, from: RecordingStatus, to: RecordingStatus) -> bool {
        let mut state = self.state.lock();
        if state.status == from {
            state.status = to;
            true
        } else {
            false
        }
    }

    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        self.state.lock().ended_at
    }

    pub fn mark_ended(&self, at: DateTime<Local>) {
        self.state.lock().ended_at.get_or_insert(at);
    }

    pub fn process_state(&self) -> ProcessState {
        self.state.lock().process.state()
    }

    pub fn with_process<R>(&self, f: impl FnOnce(&mut ProcessLifecycle) -> R) -> R {
        f(&mut self.state.lock().process)
    }

    /// Claim the user stop. Only the first caller gets true.
    pub fn claim_user_stop(&self) -> bool {
        !self.stopped_by_user.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped_by_user(&self) -> bool {
        self.stopped_by_user.load(Ordering::SeqCst)
    }

    /// Ask the monitor to send the graceful quit. Repeated requests coalesce.
    pub fn request_stop(&self) -> bool {
        self.stop_tx.try_send(()).is_ok()
    }

    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Resolves once the monitor finished cleanup
    pub async fn wait_done(&self) {
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.state.lock().process.exit_reason()
    }

    pub fn info(&self) -> RecordingInfo {
        let state = self.state.lock();
        RecordingInfo {
            stream_id: self.key.stream_id().to_string(),
            channel_id: self.key.channel_id().to_string(),
            session_id: self.session_id.clone(),
            status: state.status,
            started_at: self.started_at,
            ended_at: state.ended_at,
            playlist: self.playlist.clone(),
        }
    }
}
