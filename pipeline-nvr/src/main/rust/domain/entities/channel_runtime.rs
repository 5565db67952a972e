use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::{
    ClientHandle, Delivery, HlsSegmentBuffer, IngestLifecycle, LowLatencyMuxer, SignalQueue,
};
use crate::domain::value_objects::{ChannelSignal, ChannelStatus, CodecParameters, MediaPacket};

/// Live state of one channel, owned by the registry
#[derive(Debug)]
pub struct ChannelRuntime {
    status: ChannelStatus,
    codecs: Option<CodecParameters>,
    clients: HashMap<Uuid, ClientHandle>,
    signals: SignalQueue,
    run_token: Option<u64>,
    last_demand: Option<Instant>,
    hls: HlsSegmentBuffer,
    ll_hls: LowLatencyMuxer,
    lifecycle: IngestLifecycle,
}

impl ChannelRuntime {
    pub fn new(signals: SignalQueue, hls: HlsSegmentBuffer, ll_hls: LowLatencyMuxer) -> Self {
        Self {
            status: ChannelStatus::Offline,
            codecs: None,
            clients: HashMap::new(),
            signals,
            run_token: None,
            last_demand: None,
            hls,
            ll_hls,
            lifecycle: IngestLifecycle::new(),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ChannelStatus) {
        self.status = status;
    }

    pub fn codecs(&self) -> Option<&CodecParameters> {
        self.codecs.as_ref()
    }

    pub fn set_codecs(&mut self, codecs: Option<CodecParameters>) {
        self.codecs = codecs;
    }

    pub fn signals(&self) -> &SignalQueue {
        &self.signals
    }

    pub fn signal(&self, signal: ChannelSignal) {
        if let Some(dropped) = self.signals.push(signal) {
            tracing::debug!(?dropped, "Signal queue full, dropped oldest intent");
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_token.is_some()
    }

    /// Take the run lock. Fails when another loop owns it.
    pub fn acquire_run(&mut self, token: u64) -> bool {
        if self.run_token.is_some() {
            return false;
        }
        self.run_token = Some(token);
        self.signals.clear();
        true
    }

    /// Release the run lock only for the loop that holds it
    pub fn release_run(&mut self, token: u64) -> bool {
        if self.run_token == Some(token) {
            self.run_token = None;
            true
        } else {
            false
        }
    }

    pub fn owns(&self, token: u64) -> bool {
        self.run_token == Some(token)
    }

    pub fn touch_demand(&mut self, now: Instant) {
        self.last_demand = Some(now);
    }

    /// Whether a viewer still wants this channel. Attached clients always
    /// count; otherwise the last demand stamp must be within `grace`.
    pub fn has_demand(&self, now: Instant, grace: Duration) -> bool {
        !self.clients.is_empty()
            || self
                .last_demand
                .map(|at| now.saturating_duration_since(at) < grace)
                .unwrap_or(false)
    }

    /// How long current demand lasts without further activity.
    /// `None` once it has lapsed; attached clients count for a full `grace`.
    pub fn demand_remaining(&self, now: Instant, grace: Duration) -> Option<Duration> {
        if !self.clients.is_empty() {
            return Some(grace);
        }
        self.last_demand
            .map(|at| (at + grace).saturating_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn add_client(&mut self, client: ClientHandle) {
        self.clients.insert(client.id(), client);
    }

    pub fn remove_client(&mut self, id: &Uuid) -> Option<ClientHandle> {
        self.clients.remove(id)
    }

    pub fn has_client(&self, id: &Uuid) -> bool {
        self.clients.contains_key(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn clear_clients(&mut self) -> usize {
        let count = self.clients.len();
        self.clients.clear();
        count
    }

    /// Best-effort fan-out; returns ids of clients whose consumer is gone
    pub fn broadcast(&self, packet: &MediaPacket) -> Vec<Uuid> {
        self.clients
            .values()
            .filter(|client| client.deliver(packet) == Delivery::Closed)
            .map(ClientHandle::id)
            .collect()
    }

    pub fn hls(&self) -> &HlsSegmentBuffer {
        &self.hls
    }

    pub fn hls_mut(&mut self) -> &mut HlsSegmentBuffer {
        &mut self.hls
    }

    pub fn ll_hls(&self) -> &LowLatencyMuxer {
        &self.ll_hls
    }

    pub fn ll_hls_mut(&mut self) -> &mut LowLatencyMuxer {
        &mut self.ll_hls
    }

    pub fn lifecycle(&self) -> &IngestLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut IngestLifecycle {
        &mut self.lifecycle
    }

    /// Session teardown: offline, no codecs, muxers emptied
    pub fn reset_session(&mut self) {
        self.status = ChannelStatus::Offline;
        self.codecs = None;
        self.hls.flush();
        self.ll_hls.flush();
    }
}
