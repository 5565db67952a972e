mod channel_config;
mod channel_key;
mod channel_signal;
mod channel_status;
mod client_mode;
mod encoder_command;
mod ingest_state;
mod media;
mod recording_layout;
mod recording_status;
mod retention_policy;

pub use channel_config::{ChannelConfig, SourceProtocol, StreamConfig};
pub use channel_key::ChannelKey;
pub use channel_signal::{ChannelSignal, SessionExit};
pub use channel_status::ChannelStatus;
pub use client_mode::ClientMode;
pub use encoder_command::EncoderCommand;
pub use ingest_state::IngestState;
pub use media::{
    AudioCodec, AudioParameters, CodecParameters, MediaPacket, TrackKind, VideoCodec,
    VideoParameters,
};
pub use recording_layout::{RecordingLayout, DAY_FORMAT, PLAYBACK_PREFIX, SESSION_ID_FORMAT};
pub use recording_status::{ExitReason, RecordingStatus};
pub use retention_policy::{bytes_to_gb, gb_to_bytes, RetentionPolicy};
