use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ChannelRegistry, RecordingService};
use crate::domain::entities::{ChannelRuntime, ClientSubscription, FpsProbe, IngestLifecycle, SignalQueue};
use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{DialRequest, MediaSource, MetricsReporter, UpstreamEvent, UpstreamSession};
use crate::domain::value_objects::{
    ChannelConfig, ChannelKey, ChannelSignal, ChannelStatus, ClientMode,
    CodecParameters, MediaPacket, SessionExit, StreamConfig, TrackKind,
};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    /// Pause between a failed session and the next dial
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub no_video_timeout: Duration,
    pub client_check_interval: Duration,
    pub codec_poll_interval: Duration,
    pub codec_poll_attempts: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(20),
            no_video_timeout: Duration::from_secs(20),
            client_check_interval: Duration::from_secs(20),
            codec_poll_interval: Duration::from_millis(50),
            codec_poll_attempts: 100,
        }
    }
}

/// Fills in packet durations the transport left empty, per track
#[derive(Debug, Default)]
struct PacketClock {
    last_video: Option<Duration>,
    last_audio: Option<Duration>,
}

impl PacketClock {
    fn stamp(&mut self, mut packet: MediaPacket) -> MediaPacket {
        let last = match packet.track {
            TrackKind::Video => &mut self.last_video,
            TrackKind::Audio => &mut self.last_audio,
        };
        if packet.duration.is_zero() {
            if let Some(previous) = *last {
                packet.duration = packet.time.saturating_sub(previous);
            }
        }
        *last = Some(packet.time);
        packet
    }
}

/// Packets gathered since the last keyframe
#[derive(Debug, Default)]
struct PendingSegment {
    started_at: Option<Duration>,
    packets: Vec<MediaPacket>,
}

/// Per-channel ingest loops and their fan-out to muxers and clients
pub struct IngestService {
    registry: Arc<ChannelRegistry>,
    source: Arc<dyn MediaSource>,
    recorder: Option<Arc<RecordingService>>,
    metrics: Arc<dyn MetricsReporter>,
    settings: IngestSettings,
}

impl IngestService {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        source: Arc<dyn MediaSource>,
        metrics: Arc<dyn MetricsReporter>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            registry,
            source,
            recorder: None,
            metrics,
            settings,
        }
    }

    /// Recordings are started after each successful dial of a recording channel
    pub fn with_recorder(mut self, recorder: Arc<RecordingService>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Start the ingest loop unless one already owns the channel.
    /// Returns whether a new loop was spawned.
    pub fn ensure_running(self: &Arc<Self>, key: &ChannelKey) -> Result<bool> {
        let token = match self.registry.try_acquire_run(key)? {
            Some(token) => token,
            None => return Ok(false),
        };

        let service = Arc::clone(self);
        let loop_key = key.clone();
        let handle = tokio::spawn(async move { service.supervise(loop_key, token).await });

        let registry = Arc::clone(&self.registry);
        let watch_key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(channel = %watch_key, "Ingest loop panicked");
                    registry.release_run(&watch_key, token);
                }
            }
        });

        Ok(true)
    }

    /// Start every channel that runs without viewers
    pub fn run_all(self: &Arc<Self>) -> usize {
        let mut started = 0;
        for key in self.registry.channel_keys() {
            let always_on = self
                .registry
                .channel_config(&key)
                .map(|config| config.is_always_on())
                .unwrap_or(false);
            if always_on && matches!(self.ensure_running(&key), Ok(true)) {
                started += 1;
            }
        }
        info!(started, "Started always-on channels");
        started
    }

    fn start_always_on(self: &Arc<Self>, stream_id: &str) -> Result<()> {
        for key in self.registry.stream_channels(stream_id)? {
            if self.registry.channel_config(&key)?.is_always_on() {
                self.ensure_running(&key)?;
            }
        }
        Ok(())
    }

    pub fn add_stream(self: &Arc<Self>, stream_id: &str, config: StreamConfig) -> Result<()> {
        self.registry.add_stream(stream_id, config)?;
        info!(stream = stream_id, "Stream added");
        self.start_always_on(stream_id)
    }

    pub fn edit_stream(self: &Arc<Self>, stream_id: &str, config: StreamConfig) -> Result<()> {
        self.registry.edit_stream(stream_id, config)?;
        info!(stream = stream_id, "Stream updated");
        self.start_always_on(stream_id)
    }

    pub async fn delete_stream(&self, stream_id: &str) -> Result<()> {
        let removed = self.registry.delete_stream(stream_id)?;
        if let Some(recorder) = &self.recorder {
            for channel_id in removed.channels.keys() {
                recorder
                    .stop_recording(&ChannelKey::new(stream_id, channel_id.as_str()))
                    .await;
            }
        }
        info!(stream = stream_id, "Stream deleted");
        Ok(())
    }

    /// Reconnect every running channel of a stream
    pub fn reload_stream(&self, stream_id: &str) -> Result<usize> {
        self.registry.signal_stream(stream_id, ChannelSignal::Restart)
    }

    pub fn stop(&self, key: &ChannelKey) -> Result<()> {
        self.registry.signal(key, ChannelSignal::Stop)
    }

    pub fn restart(&self, key: &ChannelKey) -> Result<()> {
        self.registry.signal(key, ChannelSignal::Restart)
    }

    pub fn stop_all(&self) -> usize {
        let stopped = self.registry.stop_all();
        info!(stopped, "Stop requested for all running channels");
        stopped
    }

    pub fn attach_client(
        self: &Arc<Self>,
        key: &ChannelKey,
        mode: ClientMode,
    ) -> Result<ClientSubscription> {
        self.ensure_running(key)?;
        let subscription = self.registry.attach_client(key, mode)?;
        self.metrics.report_clients(1);
        debug!(channel = %key, client = %subscription.id, ?mode, "Client attached");
        Ok(subscription)
    }

    pub fn detach_client(&self, key: &ChannelKey, client_id: &Uuid) -> Result<bool> {
        let removed = self.registry.detach_client(key, client_id)?;
        if removed {
            self.metrics.report_clients(-1);
            debug!(channel = %key, client = %client_id, "Client detached");
        }
        Ok(removed)
    }

    /// Poll until the running session published its codecs
    pub async fn wait_codecs(&self, key: &ChannelKey) -> Result<CodecParameters> {
        for _ in 0..self.settings.codec_poll_attempts {
            if let Some(codecs) = self.registry.codecs(key)? {
                return Ok(codecs);
            }
            sleep(self.settings.codec_poll_interval).await;
        }
        Err(DomainError::CodecNotReady)
    }

    /// Toggle recording for a channel, starting or stopping the encoder
    pub async fn set_recording(self: &Arc<Self>, key: &ChannelKey, enabled: bool) -> Result<()> {
        self.registry.set_recording_enabled(key, enabled)?;
        let Some(recorder) = self.recorder.clone() else {
            return Ok(());
        };
        if enabled {
            let spawned = self.ensure_running(key)?;
            if !spawned && self.registry.status(key)?.is_online() {
                recorder.start_recording(key)?;
            }
        } else {
            recorder.stop_recording(key).await;
        }
        Ok(())
    }

    fn update_lifecycle(&self, key: &ChannelKey, token: u64, f: impl FnOnce(&mut IngestLifecycle)) {
        if let Ok(state) = self.registry.with_session_mut(key, token, |runtime| {
            f(runtime.lifecycle_mut());
            runtime.lifecycle().current_state()
        }) {
            self.metrics.report_ingest_state(key, &state);
        }
    }

    /// Supervisory loop: one per running channel
    async fn supervise(self: Arc<Self>, key: ChannelKey, token: u64) {
        info!(channel = %key, "Ingest loop started");
        let delay = self.settings.retry_delay;
        let mut attempt = 0u32;

        let exit = match self.registry.signal_queue(&key) {
            Err(_) => SessionExit::Deleted,
            Ok(signals) => loop {
                let config = match self.registry.channel_config(&key) {
                    Ok(config) => config,
                    Err(_) => break SessionExit::Deleted,
                };
                if !config.is_always_on() && self.demand_window(&key).is_none() {
                    break SessionExit::NoClients;
                }

                self.update_lifecycle(&key, token, |l| l.transition_to_connecting());
                let reason = match self.run_session(&key, token, &config, &signals).await {
                    Ok(exit) => {
                        self.metrics.report_session_exit(&key, &exit);
                        if exit.is_terminal() {
                            break exit;
                        }
                        if exit == SessionExit::Restart {
                            info!(channel = %key, "Restart requested, reconnecting");
                            attempt = 0;
                            continue;
                        }
                        exit.to_string()
                    }
                    Err(DomainError::SessionSuperseded) => break SessionExit::Superseded,
                    Err(e) if e.is_not_found() => break SessionExit::Deleted,
                    Err(e) => e.to_string(),
                };

                attempt += 1;
                warn!(channel = %key, reason = %reason, attempt, ?delay, "Ingest session ended, retrying");
                self.update_lifecycle(&key, token, |l| l.transition_to_backoff(attempt, reason));

                let stopped = tokio::select! {
                    _ = sleep(delay) => false,
                    signal = signals.recv() => signal == ChannelSignal::Stop,
                };
                if stopped {
                    break SessionExit::Stopped;
                }
            },
        };

        self.update_lifecycle(&key, token, IngestLifecycle::transition_to_stopped);
        self.registry.release_run(&key, token);
        info!(channel = %key, exit = %exit, "Ingest loop exited");
    }

    /// Remaining viewer demand, `None` once it lapsed
    fn demand_window(&self, key: &ChannelKey) -> Option<Duration> {
        self.registry.demand_remaining(key).ok().flatten()
    }

    /// When to look at the client set next, `None` if the session must end
    fn next_client_check(&self, key: &ChannelKey) -> Result<Option<Duration>> {
        let interval = self.settings.client_check_interval;
        if self.registry.channel_config(key)?.is_always_on() {
            return Ok(Some(interval));
        }
        Ok(self
            .registry
            .demand_remaining(key)?
            .map(|remaining| remaining.min(interval)))
    }

    async fn run_session(
        &self,
        key: &ChannelKey,
        token: u64,
        config: &ChannelConfig,
        signals: &SignalQueue,
    ) -> Result<SessionExit> {
        let request = DialRequest {
            url: config.url.clone(),
            connect_timeout: self.settings.connect_timeout,
            read_timeout: self.settings.read_timeout,
            audio: config.audio,
            debug: config.debug,
            insecure_skip_verify: config.insecure_skip_verify,
        };
        let mut upstream = match timeout(self.settings.connect_timeout, self.source.dial(request)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(DomainError::UpstreamTimeout(self.settings.connect_timeout)),
        };

        self.registry.with_session_mut(key, token, |runtime| {
            runtime.set_status(ChannelStatus::Online);
            runtime.lifecycle_mut().transition_to_streaming();
        })?;
        self.metrics.report_channel_online(key, true);
        info!(channel = %key, "Upstream connected");

        if config.on_recording {
            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.start_recording(key) {
                    warn!(channel = %key, error = %e, "Automatic recording start failed");
                }
            }
        }

        let result = self.pump(key, token, signals, &mut upstream).await;

        upstream.close();
        let _ = self
            .registry
            .with_session_mut(key, token, ChannelRuntime::reset_session);
        self.metrics.report_channel_online(key, false);
        result
    }

    /// Event loop of one connected session
    async fn pump(
        &self,
        key: &ChannelKey,
        token: u64,
        signals: &SignalQueue,
        upstream: &mut UpstreamSession,
    ) -> Result<SessionExit> {
        let mut awaiting_codecs = true;
        if let Some(codecs) = upstream.codecs.clone() {
            self.publish_codecs(key, token, codecs)?;
            awaiting_codecs = false;
        }

        let no_video = sleep(self.settings.no_video_timeout);
        tokio::pin!(no_video);
        let client_check = sleep(self.settings.client_check_interval);
        tokio::pin!(client_check);

        let mut clock = PacketClock::default();
        let mut pending = PendingSegment::default();
        let mut probe = FpsProbe::new();

        loop {
            tokio::select! {
                _ = &mut no_video => {
                    warn!(channel = %key, timeout = ?self.settings.no_video_timeout, "No video received");
                    return Ok(SessionExit::NoVideo);
                }
                _ = &mut client_check => {
                    match self.next_client_check(key)? {
                        Some(next) => client_check.as_mut().reset(Instant::now() + next),
                        None => {
                            info!(channel = %key, "No viewers left on on-demand channel");
                            return Ok(SessionExit::NoClients);
                        }
                    }
                }
                signal = signals.recv() => match signal {
                    ChannelSignal::Stop => return Ok(SessionExit::Stopped),
                    ChannelSignal::Restart => return Ok(SessionExit::Restart),
                    ChannelSignal::ClientChanged => match self.next_client_check(key)? {
                        Some(next) => client_check.as_mut().reset(Instant::now() + next),
                        None => {
                            info!(channel = %key, "Last viewer detached from on-demand channel");
                            return Ok(SessionExit::NoClients);
                        }
                    },
                },
                event = upstream.events.recv() => match event {
                    None => return Ok(SessionExit::UpstreamClosed),
                    Some(UpstreamEvent::Stopped(reason)) => {
                        info!(channel = %key, reason = %reason, "Upstream stopped");
                        return Ok(SessionExit::UpstreamClosed);
                    }
                    Some(UpstreamEvent::CodecReady(codecs)) => {
                        if awaiting_codecs {
                            self.publish_codecs(key, token, codecs)?;
                            awaiting_codecs = false;
                        }
                    }
                    Some(UpstreamEvent::CodecUpdated(_)) => {
                        info!(channel = %key, "Upstream renegotiated codecs, restarting session");
                        return Ok(SessionExit::Restart);
                    }
                    Some(UpstreamEvent::Packet(packet)) => {
                        if awaiting_codecs {
                            continue;
                        }
                        let packet = clock.stamp(packet);
                        if packet.is_video_keyframe() {
                            no_video.as_mut().reset(Instant::now() + self.settings.no_video_timeout);
                        }
                        self.dispatch(key, token, packet, &mut pending, &mut probe)?;
                    }
                },
            }
        }
    }

    fn publish_codecs(&self, key: &ChannelKey, token: u64, codecs: CodecParameters) -> Result<()> {
        debug!(
            channel = %key,
            codec = codecs.video.codec.as_str(),
            width = codecs.video.width,
            height = codecs.video.height,
            "Codecs ready"
        );
        self.registry
            .with_session_mut(key, token, |runtime| runtime.set_codecs(Some(codecs)))
    }

    /// Fan one packet out to clients, the segment buffer and the LL-HLS path
    fn dispatch(
        &self,
        key: &ChannelKey,
        token: u64,
        packet: MediaPacket,
        pending: &mut PendingSegment,
        probe: &mut FpsProbe,
    ) -> Result<()> {
        if packet.is_video_keyframe() {
            if let Some(started_at) = pending.started_at {
                let duration = packet.time.saturating_sub(started_at);
                let packets = std::mem::take(&mut pending.packets);
                self.registry.with_session_mut(key, token, |runtime| {
                    runtime.hls_mut().add_segment(packets, duration)
                })?;
            }
            pending.started_at = Some(packet.time);
        }
        if pending.started_at.is_some() {
            pending.packets.push(packet.clone());
        }

        let removed = self.registry.broadcast(key, token, &packet)?;
        if removed > 0 {
            self.metrics.report_clients(-(removed as i64));
        }

        if probe.observe(&packet).is_some() {
            let mut normalized = packet;
            if normalized.is_video() {
                if let Some(interval) = probe.frame_interval() {
                    normalized.duration = interval;
                }
            }
            self.registry.with_session_mut(key, token, |runtime| {
                runtime.ll_hls_mut().write_packet(normalized)
            })?;
        }
        Ok(())
    }
}
