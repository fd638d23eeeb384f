//! Call client test harness
//!
//! Provides:
//! - Scripted signaling channel, peer and media source fakes
//! - An in-process WebSocket signaling relay on a random port
//! - An in-process room API server
//!
//! Basic usage pattern:
//!
//! 1. Build a session with `TestSession::new(config)`
//! 2. Drive it by injecting channel messages and peer callbacks
//! 3. Call `settle()` before asserting on a snapshot

#![allow(dead_code)]

pub mod fakes;
pub mod relay;
pub mod room_api;

use parking_lot::Mutex;
use rtc_call::{CallConfig, CallSession, SessionSnapshot, SignalingChannel};
use std::sync::Arc;
use std::time::Duration;

pub use fakes::{FakeChannel, FakeMediaSource, FakePeer, FakePeerFactory};
pub use relay::SignalingRelay;
pub use room_api::RoomApiServer;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,rtc_call=debug")
        .with_test_writer()
        .try_init();
}

/// A session wired to fakes
pub struct TestSession {
    pub session: CallSession,
    pub channel: Arc<FakeChannel>,
    pub peers: Arc<FakePeerFactory>,
    pub media: Arc<FakeMediaSource>,
}

impl TestSession {
    pub fn new(config: CallConfig) -> Self {
        Self::with_parts(config, FakePeerFactory::new(), FakeMediaSource::new())
    }

    pub fn with_parts(
        config: CallConfig,
        peers: Arc<FakePeerFactory>,
        media: Arc<FakeMediaSource>,
    ) -> Self {
        let slot: Arc<Mutex<Option<Arc<FakeChannel>>>> = Arc::new(Mutex::new(None));
        let slot_in = Arc::clone(&slot);
        let session = CallSession::builder(config)
            .with_channel(move |sink| {
                let channel = FakeChannel::new(sink, true);
                *slot_in.lock() = Some(Arc::clone(&channel));
                channel as Arc<dyn SignalingChannel>
            })
            .with_peer_factory(peers.clone())
            .with_media_source(media.clone())
            .build()
            .expect("session builds");
        let channel = slot.lock().take().expect("channel constructed");

        Self {
            session,
            channel,
            peers,
            media,
        }
    }

    /// Let the session work through everything queued, including events
    /// posted while handling earlier ones
    pub async fn settle(&self) -> SessionSnapshot {
        settle(&self.session).await
    }

    /// Join `room` and settle
    pub async fn join(&self, room: &str) -> SessionSnapshot {
        self.session.join_room(room).await.expect("join succeeds");
        self.settle().await
    }

    /// Join, let `remote` join, deliver its answer and a remote track
    pub async fn in_call(&self, room: &str, remote: &str) -> Arc<FakePeer> {
        self.join(room).await;
        self.channel.inject_peer_joined(remote);
        self.settle().await;
        let peer = self.peers.latest().expect("peer created");
        self.channel.inject_answer(remote);
        self.settle().await;
        peer.emit_link(rtc_call::PeerLinkState::Connected);
        peer.emit_track("remote-stream", "remote-audio", rtc_call::MediaKind::Audio);
        self.settle().await;
        peer
    }
}

pub async fn settle(session: &CallSession) -> SessionSnapshot {
    let mut snapshot = session.snapshot().await.expect("session alive");
    for _ in 0..8 {
        tokio::task::yield_now().await;
        snapshot = session.snapshot().await.expect("session alive");
    }
    snapshot
}

/// Wait until `condition` holds, polling every few milliseconds
pub async fn wait_until<F>(what: &str, timeout: Duration, mut condition: F) -> HarnessResult<()>
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| HarnessError::Timeout(what.to_string()))
}
