//! Typed events and the broadcast dispatcher.
//!
//! Unsolicited traffic (and responses nobody correlated) is broadcast
//! to every live subscriber in arrival order. The channel is bounded
//! and non-blocking: a subscriber that falls behind lags and loses the
//! oldest events rather than stalling the dispatch loop.

use tokio::sync::broadcast;

use crate::types::contact::{Contact, PublicKey};
use crate::types::device::{BatteryStatus, Channel, DeviceInfo, RemoteStatus, SelfInfo};
use crate::types::message::{Acknowledgment, ChannelMessage, DirectMessage};
use crate::types::telemetry::Telemetry;
use crate::protocol::command::BinaryReqKind;

/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events decoded from inbound frames plus session lifecycle signals.
#[derive(Debug, Clone)]
pub enum Event {
    /// Command executed successfully.
    Ok,
    /// Device reported an error, optionally with a code byte.
    Error { code: Option<u8> },
    /// Self device information.
    SelfInfo(Box<SelfInfo>),
    /// Device information.
    DeviceInfo(Box<DeviceInfo>),
    /// Battery status.
    Battery(BatteryStatus),
    /// Current device time (Unix seconds).
    CurrentTime(u32),
    /// Contact list transfer started.
    ContactListStart { count: u32 },
    /// A contact record arrived.
    Contact(Box<Contact>),
    /// Contact list transfer finished; carries the sync watermark.
    ContactListEnd { last_modified: u32 },
    /// Message accepted for transmission.
    MessageSent {
        expected_ack: u32,
        suggested_timeout_ms: u32,
    },
    /// A direct message arrived.
    DirectMessage(Box<DirectMessage>),
    /// A channel message arrived.
    ChannelMessage(Box<ChannelMessage>),
    /// No more messages waiting on the device.
    NoMoreMessages,
    /// Channel configuration.
    ChannelInfo(Box<Channel>),
    /// Advertisement carrying just a public key.
    Advertisement(PublicKey),
    /// Advertisement carrying a full contact record.
    NewContactAdvert(Box<Contact>),
    /// Routing path updated for a contact.
    PathUpdate(PublicKey),
    /// End-to-end acknowledgment.
    Ack(Acknowledgment),
    /// Messages are waiting to be fetched.
    MessagesWaiting,
    /// Room server login succeeded.
    LoginSuccess,
    /// Room server login failed.
    LoginFailed,
    /// Status report from a remote node.
    StatusResponse(Box<RemoteStatus>),
    /// Telemetry report.
    TelemetryResponse {
        pubkey_prefix: [u8; 6],
        telemetry: Telemetry,
    },
    /// Binary response routed by (key prefix, request kind).
    BinaryResponse {
        pubkey_prefix: [u8; 6],
        kind: Option<BinaryReqKind>,
        data: Vec<u8>,
    },
    /// The transport closed underneath the session.
    Disconnected,
}

/// Fan-out of events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<Event>,
}

impl EventDispatcher {
    /// Creates a dispatcher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcasts an event to all current subscribers.
    ///
    /// Events sent while no subscriber exists are dropped.
    pub fn dispatch(&self, event: Event) {
        let receivers = self.sender.receiver_count();
        tracing::trace!(?event, receivers, "dispatching event");
        // send only fails when there are no receivers
        let _ = self.sender.send(event);
    }

    /// Creates a new subscription receiving events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A live event subscription.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
}

impl EventSubscription {
    /// Receives the next event.
    ///
    /// Returns `None` when the dispatcher is gone. A lagged receiver
    /// skips the dropped events and keeps going.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged, skipping");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
