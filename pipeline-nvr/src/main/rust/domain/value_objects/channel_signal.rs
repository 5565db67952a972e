use std::fmt;

/// Intents delivered to a channel's ingest loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    Stop,
    Restart,
    ClientChanged,
}

/// Why one ingest session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Explicit stop request
    Stopped,
    /// Restart request, reconnect without backoff
    Restart,
    /// On-demand channel lost its last viewer
    NoClients,
    /// No keyframe within the no-video timeout
    NoVideo,
    /// Transport ended the stream
    UpstreamClosed,
    /// The channel was replaced by an edit while this session ran
    Superseded,
    /// The channel was removed from the registry
    Deleted,
}

impl SessionExit {
    /// Terminal exits end the supervisory loop instead of retrying
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::NoClients | Self::Superseded | Self::Deleted
        )
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Restart => "restart",
            Self::NoClients => "no_clients",
            Self::NoVideo => "no_video",
            Self::UpstreamClosed => "upstream_closed",
            Self::Superseded => "superseded",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
