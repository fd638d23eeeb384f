//! Signaling channel abstraction

use super::protocol::{InboundMessage, OutboundMessage};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle and message events raised by a signaling channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The socket is open. Raised on the first connect and on every reconnect.
    Connected,
    /// Raised after [`ChannelEvent::Connected`] when the open followed a drop
    Reconnected { attempt: u32 },
    /// An open socket was lost
    Disconnected { reason: String },
    /// A connection attempt failed
    ConnectError { message: String },
    /// The driver used up its attempts and stopped
    ReconnectFailed,
    /// A decoded server message
    Message(InboundMessage),
}

/// Connection status of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Never connected
    Idle,
    /// A driver is running and trying to open the socket
    Connecting,
    /// The socket is open
    Open,
    /// Manually disconnected, or retries exhausted
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Idle => write!(f, "idle"),
            ChannelStatus::Connecting => write!(f, "connecting"),
            ChannelStatus::Open => write!(f, "open"),
            ChannelStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Receiver of channel events
///
/// The callback must not call back into the channel; implementations may
/// hold internal locks while emitting.
#[derive(Clone)]
pub struct ChannelEventSink {
    deliver: Arc<dyn Fn(ChannelEvent) -> bool + Send + Sync>,
}

impl ChannelEventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(ChannelEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Sink forwarding into an unbounded queue
    pub fn from_sender(tx: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self::new(move |event| tx.send(event).is_ok())
    }

    /// Deliver `event`; returns `false` if the receiver is gone
    pub fn emit(&self, event: ChannelEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for ChannelEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEventSink").finish_non_exhaustive()
    }
}

/// One logical connection to the signaling server
///
/// All inbound traffic is routed to the [`ChannelEventSink`] the channel was
/// built with, so handlers exist exactly once per channel instance no matter
/// how often it reconnects.
pub trait SignalingChannel: Send + Sync {
    /// Open the channel. No-op while open or connecting; reopens a closed
    /// channel.
    fn connect(&self);

    /// Record `room_id` as the current room and join it. While not open the
    /// join is deferred and replayed on the next connect.
    fn join_room(&self, room_id: &str);

    /// Send `message` if open. Messages are never queued; returns `false`
    /// when the message was dropped.
    fn send(&self, message: OutboundMessage) -> bool;

    /// Stop event delivery and close the socket. Idempotent.
    fn disconnect(&self);

    fn status(&self) -> ChannelStatus;

    /// Room replayed on reconnect, if any
    fn current_room(&self) -> Option<String>;

    fn is_open(&self) -> bool {
        self.status() == ChannelStatus::Open
    }
}
