use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use gstreamer::prelude::*;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::pipeline_builder::{PipelineBuilder, AUDIO_SINK, VIDEO_SINK};
use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{DialRequest, MediaSource, UpstreamEvent, UpstreamSession};
use crate::domain::value_objects::{
    AudioCodec, AudioParameters, CodecParameters, MediaPacket, TrackKind, VideoCodec,
    VideoParameters,
};

/// Timeout for bus polling (100ms allows responsive shutdown)
const BUS_POLL_TIMEOUT_MS: u64 = 100;
const PULL_TIMEOUT_MS: u64 = 100;
/// How long codec announcement waits for audio caps after video caps
const AUDIO_PROBE: Duration = Duration::from_secs(2);
const EVENT_QUEUE: usize = 512;

/// RTSP/RTMP transport backed by a GStreamer demuxing pipeline
pub struct GStreamerSource {
    event_queue: usize,
}

impl GStreamerSource {
    pub fn new() -> Self {
        Self {
            event_queue: EVENT_QUEUE,
        }
    }
}

impl Default for GStreamerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSource for GStreamerSource {
    async fn dial(&self, request: DialRequest) -> Result<UpstreamSession> {
        let description = PipelineBuilder::source_pipeline(&request)?;
        if request.debug {
            info!(url = %request.url, pipeline = %description, "Dialing upstream");
        } else {
            debug!(url = %request.url, "Dialing upstream");
        }

        let (events_tx, events_rx) = mpsc::channel(self.event_queue);
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        tokio::task::spawn_blocking(move || {
            run_upstream(&description, &request, &flag, &events_tx, ready_tx)
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(UpstreamSession::new(None, events_rx, running)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DomainError::UpstreamDial(
                "upstream pipeline thread exited".to_string(),
            )),
        }
    }
}

fn run_upstream(
    description: &str,
    request: &DialRequest,
    running: &AtomicBool,
    events: &mpsc::Sender<UpstreamEvent>,
    ready: oneshot::Sender<Result<()>>,
) {
    let upstream = match UpstreamPipeline::start(description, request) {
        Ok(upstream) => upstream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    // Dial abandoned by the caller
    if ready.send(Ok(())).is_err() {
        return;
    }

    if let Some(reason) = upstream.pump(running, events) {
        let _ = events.blocking_send(UpstreamEvent::Stopped(reason));
    }
}

enum BusOutcome {
    Continue,
    Playing,
    Stop(String),
}

struct UpstreamPipeline {
    pipeline: gstreamer::Pipeline,
    bus: gstreamer::Bus,
    video: gstreamer::Element,
    audio: Option<gstreamer::Element>,
    read_timeout: Duration,
}

impl UpstreamPipeline {
    fn start(description: &str, request: &DialRequest) -> Result<Self> {
        let pipeline = create_pipeline(description)
            .map_err(|e| DomainError::UpstreamDial(format!("{:#}", e)))?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| DomainError::UpstreamDial("Failed to get bus".to_string()))?;
        let video = pipeline
            .by_name(VIDEO_SINK)
            .ok_or_else(|| DomainError::UpstreamDial("Pipeline has no video sink".to_string()))?;
        let audio = pipeline.by_name(AUDIO_SINK);

        let upstream = Self {
            pipeline,
            bus,
            video,
            audio,
            read_timeout: request.read_timeout,
        };
        upstream
            .pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| DomainError::UpstreamDial(e.to_string()))?;
        upstream.wait_playing(request.connect_timeout)?;
        Ok(upstream)
    }

    fn wait_playing(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let poll = gstreamer::ClockTime::from_mseconds(BUS_POLL_TIMEOUT_MS);
        while Instant::now() < deadline {
            let Some(msg) = self.bus.timed_pop(poll) else {
                continue;
            };
            match process_bus_message(&msg, &self.pipeline) {
                BusOutcome::Playing => return Ok(()),
                BusOutcome::Stop(reason) => return Err(DomainError::UpstreamDial(reason)),
                BusOutcome::Continue => {}
            }
        }
        Err(DomainError::UpstreamTimeout(timeout))
    }

    /// Forward samples until the session is closed or the pipeline stops.
    /// Returns the stop reason, `None` when the ingest side hung up.
    fn pump(&self, running: &AtomicBool, events: &mpsc::Sender<UpstreamEvent>) -> Option<String> {
        let mut codecs = CodecTracker::new(self.audio.is_some());
        let mut clock = SampleClock::default();
        let mut last_video = Instant::now();
        let pull_timeout = gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT_MS);

        loop {
            if !running.load(Ordering::SeqCst) || events.is_closed() {
                debug!("Upstream session closed, stopping pipeline");
                return None;
            }

            while let Some(msg) = self.bus.pop() {
                if let BusOutcome::Stop(reason) = process_bus_message(&msg, &self.pipeline) {
                    return Some(reason);
                }
            }

            match pull_sample(&self.video, pull_timeout) {
                Some(sample) => {
                    last_video = Instant::now();
                    if let Some(caps) = sample.caps() {
                        codecs.observe_video(caps);
                    }
                    if !forward(&sample, TrackKind::Video, &mut codecs, &mut clock, events) {
                        return None;
                    }
                }
                None if last_video.elapsed() >= self.read_timeout => {
                    return Some(format!("no data for {:?}", self.read_timeout));
                }
                None => {}
            }

            if let Some(audio) = &self.audio {
                while let Some(sample) = pull_sample(audio, gstreamer::ClockTime::ZERO) {
                    if let Some(caps) = sample.caps() {
                        codecs.observe_audio(caps);
                    }
                    if !forward(&sample, TrackKind::Audio, &mut codecs, &mut clock, events) {
                        return None;
                    }
                }
            }
        }
    }
}

impl Drop for UpstreamPipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

fn create_pipeline(description: &str) -> anyhow::Result<gstreamer::Pipeline> {
    let pipeline = gstreamer::parse::launch(description)
        .context("Failed to parse pipeline")?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| anyhow::anyhow!("Failed to downcast to Pipeline"))?;
    Ok(pipeline)
}

fn process_bus_message(msg: &gstreamer::Message, pipeline: &gstreamer::Pipeline) -> BusOutcome {
    match msg.view() {
        gstreamer::MessageView::Eos(_) => BusOutcome::Stop("end of stream".to_string()),
        gstreamer::MessageView::Error(err) => BusOutcome::Stop(describe(
            err.src().map(|s| s.path_string().to_string()),
            &err.error(),
            err.debug(),
        )),
        gstreamer::MessageView::StateChanged(state_changed) => {
            if state_changed.src().map(|s| s == pipeline).unwrap_or(false) {
                debug!(
                    "Pipeline state changed from {:?} to {:?}",
                    state_changed.old(),
                    state_changed.current()
                );
                if state_changed.current() == gstreamer::State::Playing {
                    return BusOutcome::Playing;
                }
            }
            BusOutcome::Continue
        }
        gstreamer::MessageView::Warning(w) => {
            warn!(
                "Warning from {:?}: {} ({:?})",
                w.src().map(|s| s.path_string()),
                w.error(),
                w.debug()
            );
            BusOutcome::Continue
        }
        _ => BusOutcome::Continue,
    }
}

pub(super) fn describe(
    source: Option<String>,
    error: &glib::Error,
    debug: Option<glib::GString>,
) -> String {
    match (source, debug) {
        (Some(source), Some(debug)) => format!("{}: {} ({})", source, error, debug),
        (Some(source), None) => format!("{}: {}", source, error),
        (None, _) => error.to_string(),
    }
}

fn pull_sample(
    sink: &gstreamer::Element,
    timeout: gstreamer::ClockTime,
) -> Option<gstreamer::Sample> {
    sink.emit_by_name::<Option<gstreamer::Sample>>("try-pull-sample", &[&timeout.nseconds()])
}

/// Announce codecs, then send the packet. False once the receiver is gone.
fn forward(
    sample: &gstreamer::Sample,
    track: TrackKind,
    codecs: &mut CodecTracker,
    clock: &mut SampleClock,
    events: &mpsc::Sender<UpstreamEvent>,
) -> bool {
    if let Some(event) = codecs.poll() {
        if events.blocking_send(event).is_err() {
            return false;
        }
    }
    if !codecs.announced() {
        return true;
    }
    match clock.packet(sample, track) {
        Some(packet) => events.blocking_send(UpstreamEvent::Packet(packet)).is_ok(),
        None => true,
    }
}

/// Rebases buffer timestamps on the first one seen in the session
#[derive(Default)]
struct SampleClock {
    base: Option<gstreamer::ClockTime>,
}

impl SampleClock {
    fn packet(&mut self, sample: &gstreamer::Sample, track: TrackKind) -> Option<MediaPacket> {
        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;
        let data = Bytes::copy_from_slice(map.as_slice());

        let pts = buffer.pts().or_else(|| buffer.dts()).unwrap_or(gstreamer::ClockTime::ZERO);
        let base = *self.base.get_or_insert(pts);
        let time = Duration::from_nanos(pts.nseconds().saturating_sub(base.nseconds()));
        let duration = buffer
            .duration()
            .map(|d| Duration::from_nanos(d.nseconds()))
            .unwrap_or_default();

        let packet = match track {
            TrackKind::Video => {
                let keyframe = !buffer.flags().contains(gstreamer::BufferFlags::DELTA_UNIT);
                MediaPacket::video(time, keyframe, data)
            }
            TrackKind::Audio => MediaPacket::audio(time, data),
        };
        Some(packet.with_duration(duration))
    }
}

struct CodecTracker {
    expects_audio: bool,
    video: Option<VideoParameters>,
    audio: Option<AudioParameters>,
    video_seen_at: Option<Instant>,
    announced: Option<CodecParameters>,
}

impl CodecTracker {
    fn new(expects_audio: bool) -> Self {
        Self {
            expects_audio,
            video: None,
            audio: None,
            video_seen_at: None,
            announced: None,
        }
    }

    fn announced(&self) -> bool {
        self.announced.is_some()
    }

    fn observe_video(&mut self, caps: &gstreamer::CapsRef) {
        if let Some(parameters) = video_parameters(caps) {
            self.video_seen_at.get_or_insert_with(Instant::now);
            self.video = Some(parameters);
        }
    }

    fn observe_audio(&mut self, caps: &gstreamer::CapsRef) {
        if self.audio.is_none() {
            self.audio = audio_parameters(caps);
        }
    }

    /// Codec event due after the latest observation. Audio found after the
    /// announcement is ignored; a video change is reported as an update.
    fn poll(&mut self) -> Option<UpstreamEvent> {
        let video = self.video.clone()?;
        match &self.announced {
            None => {
                let waiting_for_audio = self.expects_audio
                    && self.audio.is_none()
                    && self
                        .video_seen_at
                        .map(|at| at.elapsed() < AUDIO_PROBE)
                        .unwrap_or(true);
                if waiting_for_audio {
                    return None;
                }
                let parameters = CodecParameters {
                    video,
                    audio: self.audio.clone(),
                };
                self.announced = Some(parameters.clone());
                Some(UpstreamEvent::CodecReady(parameters))
            }
            Some(current) if current.video != video => {
                let parameters = CodecParameters {
                    video,
                    audio: current.audio.clone(),
                };
                self.announced = Some(parameters.clone());
                Some(UpstreamEvent::CodecUpdated(parameters))
            }
            Some(_) => None,
        }
    }
}

fn codec_data(structure: &gstreamer::StructureRef) -> Bytes {
    structure
        .get::<gstreamer::Buffer>("codec_data")
        .ok()
        .and_then(|buffer| {
            buffer
                .map_readable()
                .ok()
                .map(|map| Bytes::copy_from_slice(map.as_slice()))
        })
        .unwrap_or_default()
}

fn video_parameters(caps: &gstreamer::CapsRef) -> Option<VideoParameters> {
    let structure = caps.structure(0)?;
    let codec = if structure.has_name(VideoCodec::H265.media_type()) {
        VideoCodec::H265
    } else if structure.has_name(VideoCodec::H264.media_type()) {
        VideoCodec::H264
    } else {
        return None;
    };
    Some(VideoParameters {
        codec,
        width: structure.get::<i32>("width").unwrap_or(0).max(0) as u32,
        height: structure.get::<i32>("height").unwrap_or(0).max(0) as u32,
        codec_data: codec_data(structure),
    })
}

fn audio_parameters(caps: &gstreamer::CapsRef) -> Option<AudioParameters> {
    let structure = caps.structure(0)?;
    if !structure.has_name("audio/mpeg") {
        return None;
    }
    Some(AudioParameters {
        codec: AudioCodec::Aac,
        sample_rate: structure.get::<i32>("rate").unwrap_or(0).max(0) as u32,
        channels: structure.get::<i32>("channels").unwrap_or(0).max(0) as u32,
        codec_data: codec_data(structure),
    })
}
