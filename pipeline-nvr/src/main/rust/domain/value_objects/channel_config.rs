use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, Result};

/// Upstream transport selected by URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceProtocol {
    Rtsp,
    Rtmp,
}

impl SourceProtocol {
    pub fn from_url(url: &str) -> Result<Self> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            Ok(Self::Rtsp)
        } else if lower.starts_with("rtmp://") || lower.starts_with("rtmps://") {
            Ok(Self::Rtmp)
        } else {
            Err(DomainError::InvalidSourceUrl(url.to_string()))
        }
    }
}

/// Persisted channel settings. Runtime state lives in the registry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
    pub url: String,
    pub on_demand: bool,
    pub audio: bool,
    pub debug: bool,
    pub insecure_skip_verify: bool,
    pub on_recording: bool,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn on_demand(mut self, on_demand: bool) -> Self {
        self.on_demand = on_demand;
        self
    }

    pub fn with_recording(mut self, on_recording: bool) -> Self {
        self.on_recording = on_recording;
        self
    }

    pub fn with_audio(mut self, audio: bool) -> Self {
        self.audio = audio;
        self
    }

    pub fn protocol(&self) -> Result<SourceProtocol> {
        SourceProtocol::from_url(&self.url)
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol().map(|_| ())
    }

    /// Channels that must stay up without any viewer attached
    pub fn is_always_on(&self) -> bool {
        !self.on_demand || self.on_recording
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    pub channels: BTreeMap<String, ChannelConfig>,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: BTreeMap::new(),
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>, channel: ChannelConfig) -> Self {
        self.channels.insert(channel_id.into(), channel);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(DomainError::InvalidConfiguration(format!(
                "stream '{}' has no channels",
                self.name
            )));
        }
        for channel in self.channels.values() {
            channel.validate()?;
        }
        Ok(())
    }
}
