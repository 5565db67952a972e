use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::ChannelRegistry;
use crate::domain::entities::{Recording, RecordingControl, RecordingInfo};
use crate::domain::errors::Result;
use crate::domain::ports::{
    EncoderInput, EncoderLauncher, EncoderOutput, EncoderProcess, KeyStore, MetricsReporter,
    ProcessExit,
};
use crate::domain::value_objects::{
    ChannelConfig, ChannelKey, EncoderCommand, ExitReason, RecordingLayout, RecordingStatus,
};

pub const ENCODER_LOG: &str = "encoder.log";

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    pub layout: RecordingLayout,
    /// Encoder binary, or the directory holding it
    pub encoder_path: PathBuf,
    /// `{stream}` / `{channel}` template for the encoder input. The channel's
    /// upstream URL is used when unset.
    pub input_template: Option<String>,
    pub segment_seconds: u32,
    pub liveness_timeout: Duration,
    pub liveness_poll: Duration,
    pub restart_delay: Duration,
    /// How long exit teardown waits for the output drain to finish
    pub drain_timeout: Duration,
}

impl RecorderSettings {
    pub fn new(layout: RecordingLayout, encoder_path: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            encoder_path: encoder_path.into(),
            input_template: None,
            segment_seconds: 10,
            liveness_timeout: Duration::from_secs(10),
            liveness_poll: Duration::from_secs(10),
            restart_delay: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Supervises one external encoder process per recording channel
pub struct RecordingService {
    registry: Arc<ChannelRegistry>,
    launcher: Arc<dyn EncoderLauncher>,
    keys: Arc<dyn KeyStore>,
    metrics: Arc<dyn MetricsReporter>,
    settings: RecorderSettings,
    recordings: Mutex<HashMap<ChannelKey, Arc<Recording>>>,
}

impl RecordingService {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        launcher: Arc<dyn EncoderLauncher>,
        keys: Arc<dyn KeyStore>,
        metrics: Arc<dyn MetricsReporter>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            registry,
            launcher,
            keys,
            metrics,
            settings,
            recordings: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Launch the encoder for a channel. A no-op while a recording for the
    /// same key is starting or on.
    pub fn start_recording(self: &Arc<Self>, key: &ChannelKey) -> Result<()> {
        let config = self.registry.channel_config(key)?;
        let stream_name = self.registry.stream_name(key.stream_id())?;

        let started_at = Local::now();
        let session_id = RecordingLayout::session_id(started_at.naive_local());
        let directory = self
            .settings
            .layout
            .channel_dir(started_at.date_naive(), key);
        let playlist = RecordingLayout::playlist_path(&directory, &session_id);
        let (recording, control) = Recording::new(
            key.clone(),
            stream_name,
            session_id,
            started_at,
            directory,
            playlist,
        );
        let recording = Arc::new(recording);

        {
            let mut recordings = self.recordings.lock();
            if let Some(existing) = recordings.get(key) {
                if existing.status().is_active() && !existing.is_done() {
                    debug!(channel = %key, session = existing.session_id(), "Recording already active");
                    return Ok(());
                }
            }
            recordings.insert(key.clone(), Arc::clone(&recording));
        }

        let process = match self.launch(&recording, &config) {
            Ok(process) => process,
            Err(e) => {
                error!(channel = %key, error = %e, "Failed to start recording");
                self.remove_entry(key, &recording);
                return Err(e);
            }
        };

        recording.transition(RecordingStatus::Starting, RecordingStatus::On);
        recording.with_process(|lifecycle| lifecycle.mark_running());
        self.metrics.report_recording_started(key);
        info!(
            channel = %key,
            session = recording.session_id(),
            playlist = %recording.playlist().display(),
            "Recording started"
        );

        let service = Arc::clone(self);
        tokio::spawn(service.monitor(recording, process, control));
        Ok(())
    }

    fn launch(
        &self,
        recording: &Recording,
        config: &ChannelConfig,
    ) -> Result<Box<dyn EncoderProcess>> {
        fs::create_dir_all(recording.directory())?;
        append_log(
            recording.directory(),
            &format!(
                "=== Recording started at {} session={} ===",
                recording.started_at().to_rfc3339(),
                recording.session_id()
            ),
        )?;

        let key_info = self.keys.key_info(recording.key())?;
        let command = EncoderCommand::new(
            EncoderCommand::resolve_program(&self.settings.encoder_path),
            self.input_url(recording.key(), config),
            key_info,
            RecordingLayout::segment_pattern(recording.directory(), recording.stream_name()),
            recording.playlist().to_path_buf(),
            self.settings.segment_seconds,
        );
        debug!(
            channel = %recording.key(),
            program = %command.program().display(),
            args = ?command.args(),
            "Launching encoder"
        );
        self.launcher.spawn(&command)
    }

    fn input_url(&self, key: &ChannelKey, config: &ChannelConfig) -> String {
        match &self.settings.input_template {
            Some(template) => template
                .replace("{stream}", key.stream_id())
                .replace("{channel}", key.channel_id()),
            None => config.url.clone(),
        }
    }

    fn remove_entry(&self, key: &ChannelKey, recording: &Arc<Recording>) {
        let mut recordings = self.recordings.lock();
        if recordings
            .get(key)
            .map(|current| Arc::ptr_eq(current, recording))
            .unwrap_or(false)
        {
            recordings.remove(key);
        }
    }

    /// Gracefully stop the encoder and wait for its cleanup.
    ///
    /// Safe to call concurrently: only the caller that claimed the stop gets
    /// true, the others wait for the same cleanup and get false.
    pub async fn stop_recording(&self, key: &ChannelKey) -> bool {
        let Some(recording) = self.recordings.lock().get(key).cloned() else {
            return false;
        };

        if recording.status() != RecordingStatus::On {
            if recording.is_done() {
                self.remove_entry(key, &recording);
            }
            return false;
        }

        if !recording.claim_user_stop() {
            // Another caller owns this stop
            recording.wait_done().await;
            return false;
        }
        recording.request_stop();
        recording.wait_done().await;

        recording.set_status(RecordingStatus::Off);
        recording.mark_ended(Local::now());
        self.remove_entry(key, &recording);
        info!(channel = %key, session = recording.session_id(), "Recording stopped");
        true
    }

    /// Stop whatever runs for the key, then start a fresh session if the
    /// channel still wants recording. Idempotent.
    pub async fn restart_recording(self: &Arc<Self>, key: &ChannelKey) -> Result<()> {
        let wanted = self
            .registry
            .channel_config(key)
            .map(|config| config.on_recording)
            .unwrap_or(false);

        let existing = self.recordings.lock().contains_key(key);
        if existing {
            self.stop_recording(key).await;
        }
        if !wanted {
            info!(channel = %key, "Recording disabled, not restarting");
            return Ok(());
        }

        sleep(self.settings.restart_delay).await;
        self.start_recording(key)
    }

    /// Roll every active recording over to a new session
    pub async fn restart_all(self: &Arc<Self>) -> usize {
        let keys = self.active_keys();
        for key in &keys {
            if let Err(e) = self.restart_recording(key).await {
                warn!(channel = %key, error = %e, "Recording restart failed");
            }
        }
        keys.len()
    }

    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for key in self.active_keys() {
            if self.stop_recording(&key).await {
                stopped += 1;
            }
        }
        stopped
    }

    fn active_keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self
            .recordings
            .lock()
            .iter()
            .filter(|(_, recording)| recording.status() == RecordingStatus::On)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn recording_status(&self, key: &ChannelKey) -> Option<RecordingStatus> {
        self.recordings.lock().get(key).map(|recording| recording.status())
    }

    pub fn recording(&self, key: &ChannelKey) -> Option<Arc<Recording>> {
        self.recordings.lock().get(key).cloned()
    }

    pub fn active_recordings(&self) -> Vec<RecordingInfo> {
        let mut infos: Vec<RecordingInfo> = self
            .recordings
            .lock()
            .values()
            .filter(|recording| recording.status().is_active())
            .map(|recording| recording.info())
            .collect();
        infos.sort_by(|a, b| {
            (&a.stream_id, &a.channel_id).cmp(&(&b.stream_id, &b.channel_id))
        });
        infos
    }

    /// Coordinator for one encoder process: drains its output, runs the
    /// liveness watchdog, forwards stop requests and decides on restart.
    async fn monitor(
        self: Arc<Self>,
        recording: Arc<Recording>,
        mut process: Box<dyn EncoderProcess>,
        mut control: RecordingControl,
    ) {
        let key = recording.key().clone();
        let mut stdin = process.take_stdin();
        let last_output = Arc::new(Mutex::new(Instant::now()));

        let drain = tokio::spawn(drain_output(
            process.take_stderr(),
            recording.directory().join(ENCODER_LOG),
            Arc::clone(&last_output),
        ));

        let (timeout_tx, mut timeout_rx) = oneshot::channel();
        let watchdog = tokio::spawn(watch_liveness(
            Arc::clone(&last_output),
            self.settings.liveness_poll,
            self.settings.liveness_timeout,
            timeout_tx,
        ));

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, mut exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = process.wait() => result,
                Ok(()) = kill_rx => {
                    let _ = process.start_kill();
                    process.wait().await
                }
            };
            let _ = exit_tx.send(result);
        });

        let mut kill_tx = Some(kill_tx);
        let mut timed_out = false;
        let mut watchdog_armed = true;
        let mut stop_open = true;

        let exit: Option<io::Result<ProcessExit>> = loop {
            tokio::select! {
                result = &mut exit_rx => break result.ok(),
                fired = &mut timeout_rx, if watchdog_armed => {
                    watchdog_armed = false;
                    if fired.is_ok() {
                        timed_out = true;
                        warn!(
                            channel = %key,
                            timeout = ?self.settings.liveness_timeout,
                            "Encoder produced no output, killing it"
                        );
                        recording.with_process(|lifecycle| lifecycle.begin_forced_stop());
                        drop(stdin.take());
                        if let Some(kill) = kill_tx.take() {
                            let _ = kill.send(());
                        }
                    }
                }
                request = control.stop_rx.recv(), if stop_open => match request {
                    Some(()) => {
                        if recording.with_process(|lifecycle| lifecycle.begin_graceful_stop()) {
                            if let Some(input) = stdin.take() {
                                send_quit(input).await;
                            }
                        }
                    }
                    None => stop_open = false,
                },
            }
        };
        watchdog.abort();
        drop(stdin);
        let _ = timeout(self.settings.drain_timeout, drain).await;

        let exit_ok = match &exit {
            Some(Ok(status)) => Some(status.success()),
            Some(Err(e)) => {
                warn!(channel = %key, error = %e, "Could not read encoder exit status");
                None
            }
            None => None,
        };
        let reason = ExitReason::classify(recording.is_stopped_by_user(), timed_out, exit_ok);
        recording.with_process(|lifecycle| lifecycle.mark_exited(reason));

        let ended_at = Local::now();
        recording.mark_ended(ended_at);
        if let Err(e) = append_log(
            recording.directory(),
            &format!(
                "=== Recording ended at {} reason={} ===",
                ended_at.to_rfc3339(),
                reason
            ),
        ) {
            debug!(channel = %key, error = %e, "Could not write encoder log trailer");
        }
        self.metrics.report_recording_exit(&key, &reason);
        info!(
            channel = %key,
            session = recording.session_id(),
            reason = %reason,
            code = ?exit.as_ref().and_then(|e| e.as_ref().ok()).and_then(|e| e.code),
            "Encoder exited"
        );

        let was_on = recording.status() == RecordingStatus::On;
        if was_on && reason.is_abnormal() {
            recording.transition(RecordingStatus::On, RecordingStatus::Error);
        }
        control.finish();

        if !was_on {
            return;
        }
        if reason.should_restart() {
            info!(channel = %key, reason = %reason, "Restarting recording");
            if let Err(e) = self.restart_recording(&key).await {
                error!(channel = %key, error = %e, "Recording restart failed");
            }
        } else if reason == ExitReason::Unknown {
            warn!(channel = %key, "Encoder exit could not be classified, not restarting");
        }
    }
}

async fn send_quit(mut input: EncoderInput) {
    if let Err(e) = input.write_all(b"q\n").await {
        debug!(error = %e, "Encoder stdin already closed");
        return;
    }
    let _ = input.flush().await;
    let _ = input.shutdown().await;
}

/// Copies encoder stderr into the session log and stamps liveness
async fn drain_output(
    output: Option<EncoderOutput>,
    log_path: PathBuf,
    last_output: Arc<Mutex<Instant>>,
) {
    let Some(output) = output else {
        return;
    };
    let mut log = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "Cannot open encoder log");
            None
        }
    };

    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        *last_output.lock() = Instant::now();
        if let Some(file) = log.as_mut() {
            if file.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                log = None;
            }
        }
    }
    if let Some(mut file) = log {
        let _ = file.flush().await;
    }
}

/// Fires once when the encoder has been silent for longer than `limit`
async fn watch_liveness(
    last_output: Arc<Mutex<Instant>>,
    poll: Duration,
    limit: Duration,
    fired: oneshot::Sender<()>,
) {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let silent_for = last_output.lock().elapsed();
        if silent_for > limit {
            let _ = fired.send(());
            return;
        }
    }
}

fn append_log(directory: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(directory.join(ENCODER_LOG))?;
    writeln!(file, "{}", line)
}
