//! Observable session state

use crate::media::{LocalStream, RemoteStream};
use crate::observable::Observable;
use crate::signaling::ChannelStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// No signaling connection, or the call ended
    Disconnected,
    /// Signaling is up, nobody else is in the room yet
    Connected,
    /// Another participant is in the room and negotiation is under way
    PeerJoined,
    /// Remote media is flowing
    ConnectedPeer,
    /// The peer link failed and an ICE restart is in progress
    Failed,
    /// The other participant left the room
    PeerLeft,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::PeerJoined => "peer-joined",
            SessionState::ConnectedPeer => "connected-peer",
            SessionState::Failed => "failed",
            SessionState::PeerLeft => "peer-left",
        }
    }

    /// Whether a peer connection is expected to exist
    pub fn in_call(&self) -> bool {
        matches!(self, SessionState::PeerJoined | SessionState::ConnectedPeer)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The values a UI binds to
#[derive(Clone)]
pub struct SessionObservers {
    pub state: Observable<SessionState>,
    pub remote_stream: Observable<Option<RemoteStream>>,
    pub status: Observable<String>,
    pub local_stream: Observable<Option<LocalStream>>,
}

impl SessionObservers {
    pub fn new() -> Self {
        Self {
            state: Observable::new(SessionState::Disconnected),
            remote_stream: Observable::new(None),
            status: Observable::new(String::new()),
            local_stream: Observable::new(None),
        }
    }

    pub fn close(&self) {
        self.state.close();
        self.remote_stream.close();
        self.status.close();
        self.local_stream.close();
    }
}

impl Default for SessionObservers {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the session internals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub room_id: Option<String>,
    pub remote_peer_id: Option<String>,
    pub channel_status: ChannelStatus,
    pub has_peer_connection: bool,
    pub peer_generation: Option<u64>,
    pub restart_attempts: u32,
    pub restart_pending: bool,
    pub recovery_exhausted: bool,
    pub local_stream_active: bool,
    pub remote_stream_id: Option<String>,
}
