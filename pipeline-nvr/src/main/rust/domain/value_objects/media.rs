use std::time::Duration;

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H.264",
            VideoCodec::H265 => "H.265",
        }
    }

    /// Caps media type of the elementary stream
    pub fn media_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/x-h264",
            VideoCodec::H265 => "video/x-h265",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Opus,
    Pcmu,
    Pcma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoParameters {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// avcC / hvcC decoder configuration record
    pub codec_data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioParameters {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u32,
    pub codec_data: Bytes,
}

/// Negotiated stream description, fixed for one ingest session
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    pub video: VideoParameters,
    pub audio: Option<AudioParameters>,
}

impl CodecParameters {
    pub fn video_only(video: VideoParameters) -> Self {
        Self { video, audio: None }
    }

    pub fn track_count(&self) -> usize {
        1 + usize::from(self.audio.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One demuxed access unit
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPacket {
    pub track: TrackKind,
    pub is_keyframe: bool,
    /// Presentation time relative to session start
    pub time: Duration,
    pub duration: Duration,
    pub data: Bytes,
}

impl MediaPacket {
    pub fn video(time: Duration, is_keyframe: bool, data: Bytes) -> Self {
        Self {
            track: TrackKind::Video,
            is_keyframe,
            time,
            duration: Duration::ZERO,
            data,
        }
    }

    pub fn audio(time: Duration, data: Bytes) -> Self {
        Self {
            track: TrackKind::Audio,
            is_keyframe: false,
            time,
            duration: Duration::ZERO,
            data,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_video(&self) -> bool {
        self.track == TrackKind::Video
    }

    /// Video keyframe, the only valid segment boundary
    pub fn is_video_keyframe(&self) -> bool {
        self.is_video() && self.is_keyframe
    }
}
