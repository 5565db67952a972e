use serde::{Deserialize, Serialize};

/// Consumer kind attached to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// Low-latency fragmented MP4 over a websocket
    FragmentStream,
    WebRtc,
    /// Local MP4 capture
    LocalSave,
}
