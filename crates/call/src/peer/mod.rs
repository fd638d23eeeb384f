//! WebRTC peer connection management
//!
//! Handles the single peer connection of a call, ICE exchange and the
//! ICE-restart recovery policy. The session talks to peers through the
//! [`RtcPeer`] / [`PeerFactory`] seam; [`connection::WebRtcPeerFactory`] is
//! the `webrtc`-backed implementation.

pub mod connection;
pub mod lifecycle;
pub mod manager;

use crate::config::IceServerConfig;
use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use connection::{WebRtcPeer, WebRtcPeerFactory};
pub use lifecycle::{ReconnectionController, RestartDecision};
pub use manager::PeerConnectionManager;

/// Link state reported by the connection-state and ICE-state callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerLinkState::New => "new",
            PeerLinkState::Checking => "checking",
            PeerLinkState::Connected => "connected",
            PeerLinkState::Disconnected => "disconnected",
            PeerLinkState::Failed => "failed",
            PeerLinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// SDP negotiation state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// Callbacks of one peer connection, posted to the session
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A remote track arrived on the stream with id `stream_id`
    Track { stream_id: String, track: RemoteTrack },
    /// A local candidate was gathered; `None` marks the end of gathering
    LocalCandidate(Option<IceCandidate>),
    ConnectionState(PeerLinkState),
    IceConnectionState(PeerLinkState),
    NegotiationNeeded,
}

/// Where a peer connection posts its callbacks
///
/// Every event carries the generation of the connection that raised it so
/// the receiver can discard events of connections it already replaced.
#[derive(Clone)]
pub struct PeerEventSink {
    generation: u64,
    deliver: Arc<dyn Fn(u64, PeerEvent) + Send + Sync>,
}

impl PeerEventSink {
    pub fn new<F>(generation: u64, deliver: F) -> Self
    where
        F: Fn(u64, PeerEvent) + Send + Sync + 'static,
    {
        Self {
            generation,
            deliver: Arc::new(deliver),
        }
    }

    pub(crate) fn with_deliver(
        generation: u64,
        deliver: Arc<dyn Fn(u64, PeerEvent) + Send + Sync>,
    ) -> Self {
        Self {
            generation,
            deliver,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        (self.deliver)(self.generation, event)
    }
}

impl fmt::Debug for PeerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEventSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// One peer connection
#[async_trait]
pub trait RtcPeer: Send + Sync {
    /// Send `track` to the remote side
    async fn add_local_track(&self, track: &LocalTrack) -> Result<()>;

    /// Create an offer and install it as the local description
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    /// Create an answer to the installed remote offer and install it locally
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn signaling_state(&self) -> SignalingState;

    /// Replace every callback with a no-op; no events are raised afterwards
    fn detach_handlers(&self);

    async fn close(&self) -> Result<()>;
}

/// Creates peer connections
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a connection using `ice_servers` that reports to `events`
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn RtcPeer>>;
}
