//! Two-party WebRTC call client
//!
//! This crate implements the client side of a one-to-one video call: room
//! signaling over a WebSocket channel, the lifecycle of a single peer
//! connection, and bounded ICE-restart recovery.
//!
//! # Features
//!
//! - **Room signaling**: `joinRoom`/`offer`/`answer`/`iceCandidate` events as
//!   JSON frames, with auto-reconnect and room replay
//! - **Single peer connection**: generation-tagged, torn down before replacement
//! - **Recovery**: immediate ICE restart on failure, one delayed check on
//!   disconnect, capped attempts
//! - **Observable state**: state, status text and remote stream for a UI
//! - **Room API**: create rooms on the REST backend
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  CallSession (cloneable handle)                      │
//! │    ↓ commands                                        │
//! │  session task (one event queue)                      │
//! │  ├─ SignalingChannel ── WebSocketChannel driver      │
//! │  ├─ PeerConnectionManager ── RtcPeer (webrtc)        │
//! │  └─ ReconnectionController (restart timer)           │
//! │    ↓ observables                                     │
//! │  state / status / remote stream                      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rtc_call::CallConfig;
//!
//! let config = CallConfig::default()
//!     .with_signaling_url("wss://signal.example.com")
//!     .with_api_base_url("https://api.example.com");
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.recovery.max_ice_restarts, 3);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use rtc_call::{CallConfig, CallSession, SessionState};
//!
//! # async fn example() -> rtc_call::Result<()> {
//! let session = CallSession::new(CallConfig::default())?;
//! session.state_observable().subscribe(|state| println!("state: {}", state));
//!
//! session.join_room("https://app.example.com/video-call?room=abc123").await?;
//! session
//!     .state_observable()
//!     .wait_for(|s| *s == SessionState::ConnectedPeer)
//!     .await;
//!
//! session.end_call().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod observable;
pub mod peer;
pub mod room;
pub mod session;
pub mod signaling;

pub use config::{CallConfig, RecoveryPolicy, SignalingRetryPolicy, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{
    LocalStream, LocalTrack, MediaAccessError, MediaConstraints, MediaKind, MediaSource,
    RemoteStream, RemoteTrack, TrackMediaSource,
};
pub use observable::{Observable, Subscription};
pub use peer::{PeerFactory, PeerLinkState, RtcPeer, WebRtcPeerFactory};
pub use room::{CreatedRoom, RoomApiClient, RoomId};
pub use session::{CallSession, CallSessionBuilder, SessionSnapshot, SessionState};
pub use signaling::{ChannelEvent, ChannelEventSink, SignalingChannel, WebSocketChannel};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
