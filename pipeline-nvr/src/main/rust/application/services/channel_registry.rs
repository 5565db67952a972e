use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::entities::{
    client_pair, ChannelRuntime, ClientSubscription, HlsSegmentBuffer, IngestSnapshot, LowLatencyMuxer,
    MediaPlaylist, SignalQueue, DEFAULT_CLIENT_QUEUE, DEFAULT_SIGNAL_CAPACITY, DEFAULT_WINDOW,
};
use crate::domain::errors::{DomainError, Result};
use crate::domain::value_objects::{
    ChannelConfig, ChannelKey, ChannelSignal, ChannelStatus, ClientMode, CodecParameters,
    IngestState, MediaPacket, StreamConfig,
};

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySettings {
    pub hls_window: usize,
    pub ll_segment_target: Duration,
    pub ll_part_target: Duration,
    pub ll_window: usize,
    pub client_queue: usize,
    pub signal_capacity: usize,
    /// How long a demand stamp keeps an on-demand channel alive
    pub demand_grace: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            hls_window: DEFAULT_WINDOW,
            ll_segment_target: Duration::from_secs(2),
            ll_part_target: Duration::from_millis(500),
            ll_window: 6,
            client_queue: DEFAULT_CLIENT_QUEUE,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
            demand_grace: Duration::from_secs(20),
        }
    }
}

#[derive(Debug)]
struct ChannelSlot {
    config: ChannelConfig,
    runtime: ChannelRuntime,
}

#[derive(Debug)]
struct StreamEntry {
    name: String,
    channels: BTreeMap<String, ChannelSlot>,
}

impl StreamEntry {
    fn config(&self) -> StreamConfig {
        StreamConfig {
            name: self.name.clone(),
            channels: self
                .channels
                .iter()
                .map(|(id, slot)| (id.clone(), slot.config.clone()))
                .collect(),
        }
    }

    fn stop_running(&self) {
        for slot in self.channels.values() {
            if slot.runtime.is_running() {
                slot.runtime.signal(ChannelSignal::Stop);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    pub status: ChannelStatus,
    pub running: bool,
    pub clients: usize,
    pub on_demand: bool,
    pub on_recording: bool,
    pub ingest: IngestSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub id: String,
    pub name: String,
    pub channels: Vec<ChannelSummary>,
}

/// Shared table of streams and their channels.
///
/// One reader/writer lock guards the whole table. Read-then-modify
/// operations take the write lock for their full duration.
pub struct ChannelRegistry {
    streams: RwLock<HashMap<String, StreamEntry>>,
    settings: RegistrySettings,
    next_token: AtomicU64,
}

impl ChannelRegistry {
    pub fn new(settings: RegistrySettings) -> Result<Self> {
        HlsSegmentBuffer::new(settings.hls_window)?;
        Ok(Self {
            streams: RwLock::new(HashMap::new()),
            settings,
            next_token: AtomicU64::new(1),
        })
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    fn new_runtime(&self) -> Result<ChannelRuntime> {
        Ok(ChannelRuntime::new(
            SignalQueue::new(self.settings.signal_capacity),
            HlsSegmentBuffer::new(self.settings.hls_window)?,
            LowLatencyMuxer::new(
                self.settings.ll_segment_target,
                self.settings.ll_part_target,
                self.settings.ll_window,
            ),
        ))
    }

    fn entry_from_config(&self, config: StreamConfig) -> Result<StreamEntry> {
        let mut channels = BTreeMap::new();
        for (id, config) in config.channels {
            let runtime = self.new_runtime()?;
            channels.insert(id, ChannelSlot { config, runtime });
        }
        Ok(StreamEntry {
            name: config.name,
            channels,
        })
    }

    pub fn add_stream(&self, stream_id: &str, config: StreamConfig) -> Result<()> {
        config.validate()?;
        let mut streams = self.streams.write();
        if streams.contains_key(stream_id) {
            return Err(DomainError::StreamAlreadyExists(stream_id.to_string()));
        }
        let entry = self.entry_from_config(config)?;
        streams.insert(stream_id.to_string(), entry);
        Ok(())
    }

    /// Replace a stream's configuration. Running sessions are told to stop;
    /// their run tokens no longer match the fresh channel state.
    pub fn edit_stream(&self, stream_id: &str, config: StreamConfig) -> Result<()> {
        config.validate()?;
        let mut streams = self.streams.write();
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_string()))?;
        let replacement = self.entry_from_config(config)?;
        entry.stop_running();
        streams.insert(stream_id.to_string(), replacement);
        Ok(())
    }

    pub fn delete_stream(&self, stream_id: &str) -> Result<StreamConfig> {
        let mut streams = self.streams.write();
        let entry = streams
            .remove(stream_id)
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_string()))?;
        entry.stop_running();
        Ok(entry.config())
    }

    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.streams.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stream_config(&self, stream_id: &str) -> Result<StreamConfig> {
        self.streams
            .read()
            .get(stream_id)
            .map(StreamEntry::config)
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_string()))
    }

    pub fn stream_name(&self, stream_id: &str) -> Result<String> {
        self.streams
            .read()
            .get(stream_id)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_string()))
    }

    /// Keys of every channel in a stream
    pub fn stream_channels(&self, stream_id: &str) -> Result<Vec<ChannelKey>> {
        self.streams
            .read()
            .get(stream_id)
            .map(|entry| {
                entry
                    .channels
                    .keys()
                    .map(|channel_id| ChannelKey::new(stream_id, channel_id.as_str()))
                    .collect()
            })
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_string()))
    }

    pub fn channel_keys(&self) -> Vec<ChannelKey> {
        let streams = self.streams.read();
        let mut keys: Vec<ChannelKey> = streams
            .iter()
            .flat_map(|(stream_id, entry)| {
                entry
                    .channels
                    .keys()
                    .map(move |channel_id| ChannelKey::new(stream_id.as_str(), channel_id.as_str()))
            })
            .collect();
        keys.sort();
        keys
    }

    pub fn channel_exists(&self, key: &ChannelKey) -> bool {
        self.with_slot(key, |_| ()).is_ok()
    }

    pub fn channel_config(&self, key: &ChannelKey) -> Result<ChannelConfig> {
        self.with_slot(key, |slot| slot.config.clone())
    }

    pub fn set_recording_enabled(&self, key: &ChannelKey, enabled: bool) -> Result<()> {
        self.with_slot_mut(key, |slot| slot.config.on_recording = enabled)
    }

    pub fn streams_status(&self) -> Vec<StreamSummary> {
        let streams = self.streams.read();
        let mut summaries: Vec<StreamSummary> = streams
            .iter()
            .map(|(id, entry)| StreamSummary {
                id: id.clone(),
                name: entry.name.clone(),
                channels: entry
                    .channels
                    .iter()
                    .map(|(channel_id, slot)| ChannelSummary {
                        id: channel_id.clone(),
                        name: slot.config.name.clone(),
                        status: slot.runtime.status(),
                        running: slot.runtime.is_running(),
                        clients: slot.runtime.client_count(),
                        on_demand: slot.config.on_demand,
                        on_recording: slot.config.on_recording,
                        ingest: slot.runtime.lifecycle().snapshot(),
                    })
                    .collect(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    fn with_slot<R>(&self, key: &ChannelKey, f: impl FnOnce(&ChannelSlot) -> R) -> Result<R> {
        let streams = self.streams.read();
        let entry = streams
            .get(key.stream_id())
            .ok_or_else(|| DomainError::StreamNotFound(key.stream_id().to_string()))?;
        let slot = entry
            .channels
            .get(key.channel_id())
            .ok_or_else(|| DomainError::channel_not_found(key.stream_id(), key.channel_id()))?;
        Ok(f(slot))
    }

    fn with_slot_mut<R>(
        &self,
        key: &ChannelKey,
        f: impl FnOnce(&mut ChannelSlot) -> R,
    ) -> Result<R> {
        let mut streams = self.streams.write();
        let entry = streams
            .get_mut(key.stream_id())
            .ok_or_else(|| DomainError::StreamNotFound(key.stream_id().to_string()))?;
        let slot = entry
            .channels
            .get_mut(key.channel_id())
            .ok_or_else(|| DomainError::channel_not_found(key.stream_id(), key.channel_id()))?;
        Ok(f(slot))
    }

    pub fn with_channel<R>(
        &self,
        key: &ChannelKey,
        f: impl FnOnce(&ChannelRuntime) -> R,
    ) -> Result<R> {
        self.with_slot(key, |slot| f(&slot.runtime))
    }

    pub fn with_channel_mut<R>(
        &self,
        key: &ChannelKey,
        f: impl FnOnce(&mut ChannelRuntime) -> R,
    ) -> Result<R> {
        self.with_slot_mut(key, |slot| f(&mut slot.runtime))
    }

    /// Mutate channel state on behalf of the ingest loop holding `token`
    pub fn with_session_mut<R>(
        &self,
        key: &ChannelKey,
        token: u64,
        f: impl FnOnce(&mut ChannelRuntime) -> R,
    ) -> Result<R> {
        self.with_slot_mut(key, |slot| {
            if slot.runtime.owns(token) {
                Ok(f(&mut slot.runtime))
            } else {
                Err(DomainError::SessionSuperseded)
            }
        })?
    }

    /// Check-and-set of the run lock. Returns the session token on success,
    /// `None` when a loop already runs the channel.
    pub fn try_acquire_run(&self, key: &ChannelKey) -> Result<Option<u64>> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.with_channel_mut(key, |runtime| {
            runtime.touch_demand(Instant::now());
            runtime.acquire_run(token).then_some(token)
        })
    }

    pub fn release_run(&self, key: &ChannelKey, token: u64) -> bool {
        self.with_channel_mut(key, |runtime| {
            let released = runtime.release_run(token);
            if released {
                runtime.reset_session();
            }
            released
        })
        .unwrap_or(false)
    }

    pub fn is_running(&self, key: &ChannelKey) -> bool {
        self.with_channel(key, ChannelRuntime::is_running)
            .unwrap_or(false)
    }

    pub fn touch_demand(&self, key: &ChannelKey) -> Result<()> {
        self.with_channel_mut(key, |runtime| runtime.touch_demand(Instant::now()))
    }

    pub fn demand_remaining(&self, key: &ChannelKey) -> Result<Option<Duration>> {
        let grace = self.settings.demand_grace;
        self.with_channel(key, |runtime| runtime.demand_remaining(Instant::now(), grace))
    }

    pub fn signal(&self, key: &ChannelKey, signal: ChannelSignal) -> Result<()> {
        self.with_channel(key, |runtime| runtime.signal(signal))
    }

    /// Signal every channel of a stream that currently runs
    pub fn signal_stream(&self, stream_id: &str, signal: ChannelSignal) -> Result<usize> {
        let streams = self.streams.read();
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_string()))?;
        let mut signalled = 0;
        for slot in entry.channels.values() {
            if slot.runtime.is_running() {
                slot.runtime.signal(signal);
                signalled += 1;
            }
        }
        Ok(signalled)
    }

    pub fn stop_all(&self) -> usize {
        let streams = self.streams.read();
        let mut stopped = 0;
        for entry in streams.values() {
            for slot in entry.channels.values() {
                if slot.runtime.is_running() {
                    slot.runtime.signal(ChannelSignal::Stop);
                    stopped += 1;
                }
            }
        }
        stopped
    }

    pub fn signal_queue(&self, key: &ChannelKey) -> Result<SignalQueue> {
        self.with_channel(key, |runtime| runtime.signals().clone())
    }

    pub fn attach_client(&self, key: &ChannelKey, mode: ClientMode) -> Result<ClientSubscription> {
        let queue = self.settings.client_queue;
        self.with_channel_mut(key, |runtime| {
            let (handle, subscription) = client_pair(key.clone(), mode, queue);
            runtime.add_client(handle);
            runtime.touch_demand(Instant::now());
            runtime.signal(ChannelSignal::ClientChanged);
            subscription
        })
    }

    /// A departing viewer leaves a fresh demand stamp, so on-demand
    /// channels linger for the grace period.
    pub fn detach_client(&self, key: &ChannelKey, client_id: &Uuid) -> Result<bool> {
        self.with_channel_mut(key, |runtime| {
            let removed = runtime.remove_client(client_id).is_some();
            if removed {
                runtime.touch_demand(Instant::now());
                runtime.signal(ChannelSignal::ClientChanged);
            }
            removed
        })
    }

    pub fn has_client(&self, key: &ChannelKey, client_id: &Uuid) -> bool {
        self.with_channel(key, |runtime| runtime.has_client(client_id))
            .unwrap_or(false)
    }

    pub fn client_count(&self, key: &ChannelKey) -> Result<usize> {
        self.with_channel(key, ChannelRuntime::client_count)
    }

    /// Fan a packet out to every client of the session. Clients whose
    /// consumer disconnected are removed; returns how many were removed.
    pub fn broadcast(&self, key: &ChannelKey, token: u64, packet: &MediaPacket) -> Result<usize> {
        let closed = self.with_slot(key, |slot| {
            if slot.runtime.owns(token) {
                Ok(slot.runtime.broadcast(packet))
            } else {
                Err(DomainError::SessionSuperseded)
            }
        })??;
        if closed.is_empty() {
            return Ok(0);
        }
        self.with_session_mut(key, token, |runtime| {
            for id in &closed {
                runtime.remove_client(id);
            }
            runtime.signal(ChannelSignal::ClientChanged);
            closed.len()
        })
    }

    pub fn status(&self, key: &ChannelKey) -> Result<ChannelStatus> {
        self.with_channel(key, ChannelRuntime::status)
    }

    pub fn ingest_state(&self, key: &ChannelKey) -> Result<IngestState> {
        self.with_channel(key, |runtime| runtime.lifecycle().current_state())
    }

    pub fn codecs(&self, key: &ChannelKey) -> Result<Option<CodecParameters>> {
        self.with_channel(key, |runtime| runtime.codecs().cloned())
    }

    pub fn hls_playlist(&self, key: &ChannelKey) -> Result<MediaPlaylist> {
        self.with_channel(key, |runtime| runtime.hls().playlist())?
    }

    pub fn hls_segment(&self, key: &ChannelKey, sequence: u64) -> Result<Vec<MediaPacket>> {
        self.with_channel(key, |runtime| {
            runtime
                .hls()
                .segment(sequence)
                .map(|segment| segment.packets().to_vec())
        })?
        .ok_or_else(|| DomainError::SegmentNotFound(format!("{}/{}", key, sequence)))
    }

    pub fn ll_playlist(&self, key: &ChannelKey) -> Result<String> {
        self.with_channel(key, |runtime| runtime.ll_hls().playlist())?
    }

    pub fn ll_has(&self, key: &ChannelKey, msn: u64, part: Option<usize>) -> Result<bool> {
        self.with_channel(key, |runtime| runtime.ll_hls().has(msn, part))
    }

    pub fn ll_segment(&self, key: &ChannelKey, msn: u64) -> Result<Vec<MediaPacket>> {
        self.with_channel(key, |runtime| runtime.ll_hls().segment(msn))?
            .ok_or_else(|| DomainError::SegmentNotFound(format!("{}/{}", key, msn)))
    }

    pub fn ll_fragment(&self, key: &ChannelKey, msn: u64, part: usize) -> Result<Vec<MediaPacket>> {
        self.with_channel(key, |runtime| runtime.ll_hls().fragment(msn, part))?
            .ok_or_else(|| DomainError::SegmentNotFound(format!("{}/{}/{}", key, msn, part)))
    }

    pub fn ll_init(&self, key: &ChannelKey) -> Result<Option<Bytes>> {
        self.with_channel(key, |runtime| runtime.ll_hls().init())
    }

    /// Packets the init section is derived from
    pub fn ll_first_part(&self, key: &ChannelKey) -> Result<Vec<MediaPacket>> {
        self.with_channel(key, |runtime| runtime.ll_hls().first_part())?
            .ok_or_else(|| DomainError::SegmentNotFound(format!("{}/init", key)))
    }

    pub fn ll_store_init(&self, key: &ChannelKey, init: Bytes) -> Result<()> {
        self.with_channel_mut(key, |runtime| {
            if runtime.ll_hls().init().is_none() {
                runtime.ll_hls_mut().set_init(init);
            }
        })
    }
}
