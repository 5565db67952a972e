use std::fmt;

use serde::Serialize;

/// Upstream status of a channel as exposed to status listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    #[default]
    Offline,
    Online,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "OFFLINE"),
            Self::Online => write!(f, "ONLINE"),
        }
    }
}

impl ChannelStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}
