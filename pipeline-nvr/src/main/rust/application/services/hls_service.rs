use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::{ChannelRegistry, IngestService};
use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::ContainerMuxer;
use crate::domain::value_objects::{ChannelKey, CodecParameters};

#[derive(Debug, Clone, PartialEq)]
pub struct HlsSettings {
    pub playlist_poll_interval: Duration,
    pub playlist_poll_attempts: u32,
    pub ll_poll_interval: Duration,
    /// Upper bound for a blocking LL-HLS playlist reload
    pub ll_block_timeout: Duration,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            playlist_poll_interval: Duration::from_secs(1),
            playlist_poll_attempts: 40,
            ll_poll_interval: Duration::from_millis(100),
            ll_block_timeout: Duration::from_secs(10),
        }
    }
}

/// Serves classic and low-latency HLS out of the live channel buffers
pub struct HlsService {
    ingest: Arc<IngestService>,
    muxer: Arc<dyn ContainerMuxer>,
    settings: HlsSettings,
}

impl HlsService {
    pub fn new(
        ingest: Arc<IngestService>,
        muxer: Arc<dyn ContainerMuxer>,
        settings: HlsSettings,
    ) -> Self {
        Self {
            ingest,
            muxer,
            settings,
        }
    }

    fn registry(&self) -> &ChannelRegistry {
        self.ingest.registry()
    }

    /// Keep the channel alive on behalf of a viewer that holds no client
    fn demand(&self, key: &ChannelKey) -> Result<()> {
        self.ingest.ensure_running(key)?;
        self.registry().touch_demand(key)
    }

    fn codecs(&self, key: &ChannelKey) -> Result<CodecParameters> {
        self.registry().codecs(key)?.ok_or(DomainError::CodecNotReady)
    }

    /// Media playlist once enough segments are buffered
    pub async fn hls_playlist(&self, key: &ChannelKey) -> Result<String> {
        for attempt in 0..self.settings.playlist_poll_attempts {
            self.demand(key)?;
            match self.registry().hls_playlist(key) {
                Ok(playlist) => return Ok(playlist.text),
                Err(DomainError::PlaylistNotReady { available, required }) => {
                    debug!(channel = %key, attempt, available, required, "Waiting for HLS segments");
                    sleep(self.settings.playlist_poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.registry().hls_playlist(key).map(|playlist| playlist.text)
    }

    /// MPEG-TS bytes of one buffered segment
    pub fn hls_segment(&self, key: &ChannelKey, sequence: u64) -> Result<Bytes> {
        self.registry().touch_demand(key)?;
        let codecs = self.codecs(key)?;
        let packets = self.registry().hls_segment(key, sequence)?;
        self.muxer.mpegts(&codecs, &packets)
    }

    /// LL-HLS playlist, blocking until `msn`/`part` exist when they are
    /// requested. Falls back to the current playlist at the deadline.
    pub async fn ll_playlist(
        &self,
        key: &ChannelKey,
        msn: Option<u64>,
        part: Option<usize>,
    ) -> Result<String> {
        let deadline = Instant::now() + self.settings.ll_block_timeout;
        loop {
            self.demand(key)?;
            let reached = match msn {
                Some(msn) => self.registry().ll_has(key, msn, part)?,
                None => true,
            };
            if reached {
                match self.registry().ll_playlist(key) {
                    Ok(text) => return Ok(text),
                    Err(DomainError::PlaylistNotReady { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            if Instant::now() >= deadline {
                return self.registry().ll_playlist(key);
            }
            sleep(self.settings.ll_poll_interval).await;
        }
    }

    /// `init.mp4`, derived once from the first part and cached per session
    pub fn ll_init(&self, key: &ChannelKey) -> Result<Bytes> {
        if let Some(init) = self.registry().ll_init(key)? {
            return Ok(init);
        }
        let codecs = self.codecs(key)?;
        let packets = self.registry().ll_first_part(key)?;
        let init = self.muxer.fragmented_mp4(&codecs, &packets)?.init;
        self.registry().ll_store_init(key, init.clone())?;
        Ok(init)
    }

    pub fn ll_segment(&self, key: &ChannelKey, msn: u64) -> Result<Bytes> {
        self.registry().touch_demand(key)?;
        let codecs = self.codecs(key)?;
        let packets = self.registry().ll_segment(key, msn)?;
        Ok(self.muxer.fragmented_mp4(&codecs, &packets)?.media)
    }

    pub fn ll_fragment(&self, key: &ChannelKey, msn: u64, part: usize) -> Result<Bytes> {
        self.registry().touch_demand(key)?;
        let codecs = self.codecs(key)?;
        let packets = self.registry().ll_fragment(key, msn, part)?;
        Ok(self.muxer.fragmented_mp4(&codecs, &packets)?.media)
    }
}
