use anyhow::Context;
use bytes::{Bytes, BytesMut};
use gstreamer::prelude::*;
use tracing::{debug, trace};

use super::gstreamer_source::describe;
use super::pipeline_builder::{PipelineBuilder, MUX_SINK, MUX_SOURCE};
use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{ContainerMuxer, FragmentedMp4};
use crate::domain::value_objects::{CodecParameters, MediaPacket, VideoCodec, VideoParameters};

/// Covers any single segment or part, so each call yields one `moof`
const FRAGMENT_MS: u32 = 60_000;

/// Muxes buffered access units through short-lived appsrc/appsink
/// pipelines. Only the video track is muxed.
pub struct GStreamerMuxer;

impl GStreamerMuxer {
    pub fn new() -> Self {
        Self
    }

    fn run(
        &self,
        description: &str,
        video: &VideoParameters,
        packets: &[MediaPacket],
    ) -> Result<Bytes> {
        let pipeline = gstreamer::parse::launch(description)
            .context("Failed to parse pipeline")
            .and_then(|element| {
                element
                    .downcast::<gstreamer::Pipeline>()
                    .map_err(|_| anyhow::anyhow!("Failed to downcast to Pipeline"))
            })
            .map_err(|e| DomainError::Mux(format!("{:#}", e)))?;
        let session = MuxSession { pipeline };
        session.mux(video, packets)
    }
}

impl Default for GStreamerMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerMuxer for GStreamerMuxer {
    fn mpegts(&self, codecs: &CodecParameters, packets: &[MediaPacket]) -> Result<Bytes> {
        let description = PipelineBuilder::mpegts_pipeline(codecs.video.codec);
        self.run(&description, &codecs.video, packets)
    }

    fn fragmented_mp4(
        &self,
        codecs: &CodecParameters,
        packets: &[MediaPacket],
    ) -> Result<FragmentedMp4> {
        let description =
            PipelineBuilder::fragmented_mp4_pipeline(codecs.video.codec, FRAGMENT_MS);
        let stream = self.run(&description, &codecs.video, packets)?;
        Ok(FragmentedMp4::split(stream))
    }
}

struct MuxSession {
    pipeline: gstreamer::Pipeline,
}

impl MuxSession {
    fn element(&self, name: &str) -> Result<gstreamer::Element> {
        self.pipeline
            .by_name(name)
            .ok_or_else(|| DomainError::Mux(format!("Pipeline has no element {}", name)))
    }

    fn mux(&self, video: &VideoParameters, packets: &[MediaPacket]) -> Result<Bytes> {
        let source = self.element(MUX_SOURCE)?;
        let sink = self.element(MUX_SINK)?;

        source.set_property("caps", &input_caps(video));
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| DomainError::Mux(e.to_string()))?;

        let mut pushed = 0usize;
        for packet in packets.iter().filter(|packet| packet.is_video()) {
            let flow =
                source.emit_by_name::<gstreamer::FlowReturn>("push-buffer", &[&to_buffer(packet)]);
            if flow != gstreamer::FlowReturn::Ok {
                return Err(DomainError::Mux(format!("push-buffer returned {:?}", flow)));
            }
            pushed += 1;
        }
        source.emit_by_name::<gstreamer::FlowReturn>("end-of-stream", &[]);

        let mut output = BytesMut::new();
        while let Some(sample) = sink.emit_by_name::<Option<gstreamer::Sample>>("pull-sample", &[]) {
            if let Some(buffer) = sample.buffer() {
                let map = buffer
                    .map_readable()
                    .map_err(|e| DomainError::Mux(e.to_string()))?;
                output.extend_from_slice(map.as_slice());
            }
        }
        self.check_bus()?;

        trace!(pushed, bytes = output.len(), "Muxed packets");
        Ok(output.freeze())
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) = bus.pop() {
            if let gstreamer::MessageView::Error(err) = msg.view() {
                return Err(DomainError::Mux(describe(
                    err.src().map(|s| s.path_string().to_string()),
                    &err.error(),
                    err.debug(),
                )));
            }
        }
        Ok(())
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            debug!(error = %e, "Failed to stop mux pipeline");
        }
    }
}

fn input_caps(video: &VideoParameters) -> gstreamer::Caps {
    let stream_format = match video.codec {
        VideoCodec::H264 => "avc",
        VideoCodec::H265 => "hvc1",
    };
    let mut caps = gstreamer::Caps::builder(video.codec.media_type())
        .field("stream-format", stream_format)
        .field("alignment", "au");
    if video.width > 0 && video.height > 0 {
        caps = caps
            .field("width", video.width as i32)
            .field("height", video.height as i32);
    }
    if !video.codec_data.is_empty() {
        caps = caps.field(
            "codec_data",
            gstreamer::Buffer::from_slice(video.codec_data.clone()),
        );
    }
    caps.build()
}

fn to_buffer(packet: &MediaPacket) -> gstreamer::Buffer {
    let mut buffer = gstreamer::Buffer::from_slice(packet.data.clone());
    if let Some(buffer) = buffer.get_mut() {
        let pts = gstreamer::ClockTime::from_nseconds(packet.time.as_nanos() as u64);
        buffer.set_pts(pts);
        buffer.set_dts(pts);
        if !packet.duration.is_zero() {
            buffer.set_duration(gstreamer::ClockTime::from_nseconds(
                packet.duration.as_nanos() as u64,
            ));
        }
        if !packet.is_keyframe {
            buffer.set_flags(gstreamer::BufferFlags::DELTA_UNIT);
        }
    }
    buffer
}
