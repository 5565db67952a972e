use crate::domain::errors::Result;
use crate::domain::ports::DialRequest;
use crate::domain::value_objects::{SourceProtocol, VideoCodec};

/// Name of the appsink carrying video access units
pub const VIDEO_SINK: &str = "video";
/// Name of the appsink carrying audio frames
pub const AUDIO_SINK: &str = "audio";
/// Name of the appsrc fed by the muxers
pub const MUX_SOURCE: &str = "src";
/// Name of the appsink draining the muxers
pub const MUX_SINK: &str = "sink";

const VIDEO_CAPS: &str = "video/x-h264,stream-format=avc,alignment=au;\
                          video/x-h265,stream-format=hvc1,alignment=au";
const AUDIO_CAPS: &str = "audio/mpeg,mpegversion=4,stream-format=raw";
const SINK_PROPERTIES: &str = "sync=false max-buffers=200 drop=false";

pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Demuxing pipeline for an upstream URL. Elementary streams end in
    /// appsinks named `video` and `audio`.
    pub fn source_pipeline(request: &DialRequest) -> Result<String> {
        let pipeline = match SourceProtocol::from_url(&request.url)? {
            SourceProtocol::Rtsp => Self::rtsp_pipeline(request),
            SourceProtocol::Rtmp => Self::rtmp_pipeline(request),
        };
        Ok(pipeline)
    }

    fn rtsp_pipeline(request: &DialRequest) -> String {
        // tcp-timeout is in microseconds
        let mut pipeline = format!(
            "rtspsrc name=upstream location=\"{}\" latency=200 protocols=tcp tcp-timeout={}",
            request.url,
            request.connect_timeout.as_micros()
        );
        if request.insecure_skip_verify {
            pipeline.push_str(" tls-validation-flags=0");
        }
        pipeline.push_str(&format!(
            " upstream. ! queue ! parsebin ! {} ! appsink name={} {}",
            VIDEO_CAPS, VIDEO_SINK, SINK_PROPERTIES
        ));
        if request.audio {
            pipeline.push_str(&format!(
                " upstream. ! queue ! parsebin ! {} ! appsink name={} {}",
                AUDIO_CAPS, AUDIO_SINK, SINK_PROPERTIES
            ));
        }
        pipeline
    }

    fn rtmp_pipeline(request: &DialRequest) -> String {
        let mut pipeline = format!(
            "rtmpsrc location=\"{}\" timeout={} ! flvdemux name=demux \
             demux.video ! queue ! h264parse ! video/x-h264,stream-format=avc,alignment=au ! \
             appsink name={} {}",
            request.url,
            request.connect_timeout.as_secs().max(1),
            VIDEO_SINK,
            SINK_PROPERTIES
        );
        if request.audio {
            pipeline.push_str(&format!(
                " demux.audio ! queue ! aacparse ! {} ! appsink name={} {}",
                AUDIO_CAPS, AUDIO_SINK, SINK_PROPERTIES
            ));
        }
        pipeline
    }

    /// MPEG-TS muxing of pushed access units
    pub fn mpegts_pipeline(codec: VideoCodec) -> String {
        format!(
            "appsrc name={} format=time ! {} config-interval=-1 ! \
             {},stream-format=byte-stream,alignment=au ! \
             mpegtsmux ! appsink name={} sync=false",
            MUX_SOURCE,
            Self::parser(codec),
            codec.media_type(),
            MUX_SINK
        )
    }

    /// Fragmented MP4 muxing of pushed access units. `fragment_ms` bounds
    /// each `moof` fragment.
    pub fn fragmented_mp4_pipeline(codec: VideoCodec, fragment_ms: u32) -> String {
        format!(
            "appsrc name={} format=time ! {} ! \
             mp4mux fragment-duration={} streamable=true ! appsink name={} sync=false",
            MUX_SOURCE,
            Self::parser(codec),
            fragment_ms,
            MUX_SINK
        )
    }

    fn parser(codec: VideoCodec) -> &'static str {
        match codec {
            VideoCodec::H264 => "h264parse",
            VideoCodec::H265 => "h265parse",
        }
    }
}
