use std::path::PathBuf;

use crate::domain::errors::Result;
use crate::domain::value_objects::ChannelKey;

/// Port for per-channel AES-128 segment keys
pub trait KeyStore: Send + Sync {
    /// Path of the encoder key-info file for a channel, created on first use
    fn key_info(&self, key: &ChannelKey) -> Result<PathBuf>;

    /// Raw 16-byte key served to authorized players
    fn read_key(&self, key: &ChannelKey) -> Result<Vec<u8>>;
}
