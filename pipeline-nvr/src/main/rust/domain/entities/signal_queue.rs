use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::value_objects::ChannelSignal;

pub const DEFAULT_SIGNAL_CAPACITY: usize = 100;

/// Bounded multi-producer queue of channel intents.
///
/// Producers never wait: when the queue is full the oldest intent is
/// discarded. A single ingest loop consumes it.
#[derive(Debug, Clone)]
pub struct SignalQueue {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    queue: Mutex<VecDeque<ChannelSignal>>,
    notify: Notify,
    capacity: usize,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    /// Enqueue an intent. Returns the intent evicted to make room, if any.
    pub fn push(&self, signal: ChannelSignal) -> Option<ChannelSignal> {
        let dropped = {
            let mut queue = self.inner.queue.lock();
            let dropped = if queue.len() >= self.inner.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(signal);
            dropped
        };
        self.inner.notify.notify_one();
        dropped
    }

    pub fn try_recv(&self) -> Option<ChannelSignal> {
        self.inner.queue.lock().pop_front()
    }

    /// Wait for the next intent. Safe to drop mid-wait inside `select!`.
    pub async fn recv(&self) -> ChannelSignal {
        loop {
            if let Some(signal) = self.try_recv() {
                return signal;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.queue.lock().clear();
    }
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY)
    }
}
