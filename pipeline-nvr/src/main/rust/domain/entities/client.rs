use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::value_objects::{ChannelKey, ClientMode, MediaPacket};

pub const DEFAULT_CLIENT_QUEUE: usize = 1024;

/// Outcome of a non-blocking delivery to one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full, packet skipped for this client
    Dropped,
    /// Consumer went away
    Closed,
}

/// Registry-side end of a client subscription
#[derive(Debug)]
pub struct ClientHandle {
    id: Uuid,
    mode: ClientMode,
    packets: mpsc::Sender<MediaPacket>,
}

impl ClientHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn deliver(&self, packet: &MediaPacket) -> Delivery {
        match self.packets.try_send(packet.clone()) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Consumer-side end. The packet queue closes when the registry drops the
/// client, which is the consumer's disconnect signal.
#[derive(Debug)]
pub struct ClientSubscription {
    pub id: Uuid,
    pub key: ChannelKey,
    pub mode: ClientMode,
    pub packets: mpsc::Receiver<MediaPacket>,
}

pub fn client_pair(
    key: ChannelKey,
    mode: ClientMode,
    queue: usize,
) -> (ClientHandle, ClientSubscription) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(queue.max(1));
    (
        ClientHandle {
            id,
            mode,
            packets: tx,
        },
        ClientSubscription {
            id,
            key,
            mode,
            packets: rx,
        },
    )
}
