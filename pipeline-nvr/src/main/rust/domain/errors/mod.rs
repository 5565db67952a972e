use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Channel not found: {stream_id}/{channel_id}")]
    ChannelNotFound {
        stream_id: String,
        channel_id: String,
    },

    #[error("Stream already exists: {0}")]
    StreamAlreadyExists(String),

    #[error("Recording not found: {0}")]
    RecordingNotFound(String),

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid source URL: {0}")]
    InvalidSourceUrl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Upstream dial failed: {0}")]
    UpstreamDial(String),

    #[error("Upstream dial timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("Upstream closed: {0}")]
    UpstreamClosed(String),

    #[error("Codec not ready")]
    CodecNotReady,

    #[error("No video received for {0:?}")]
    NoVideo(std::time::Duration),

    #[error("Playlist not ready: {available} of {required} segments buffered")]
    PlaylistNotReady { available: usize, required: usize },

    #[error("Ingest session superseded")]
    SessionSuperseded,

    #[error("Encoder process failed: {0}")]
    Process(String),

    #[error("Muxing failed: {0}")]
    Mux(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DomainError {
    pub fn channel_not_found(stream_id: &str, channel_id: &str) -> Self {
        Self::ChannelNotFound {
            stream_id: stream_id.to_string(),
            channel_id: channel_id.to_string(),
        }
    }

    /// Unknown stream, channel, recording or segment
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::StreamNotFound(_)
                | Self::ChannelNotFound { .. }
                | Self::RecordingNotFound(_)
                | Self::SegmentNotFound(_)
        )
    }

    /// Failures the ingest loop retries after its backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamDial(_)
                | Self::UpstreamTimeout(_)
                | Self::UpstreamClosed(_)
                | Self::CodecNotReady
                | Self::NoVideo(_)
                | Self::Process(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
