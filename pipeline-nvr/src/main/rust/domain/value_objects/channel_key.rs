use std::fmt;

/// Identifies one channel inside one stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    stream_id: String,
    channel_id: String,
}

impl ChannelKey {
    pub fn new(stream_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            channel_id: channel_id.into(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

/// Rendered as `stream_channel`, the recording and key-file identifier
impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.stream_id, self.channel_id)
    }
}
