//! Public session handle

use super::actor::{SessionActor, SessionCommand, SessionEvent};
use super::state::{SessionObservers, SessionSnapshot, SessionState};
use crate::config::CallConfig;
use crate::media::{LocalStream, MediaConstraints, MediaSource, RemoteStream, TrackMediaSource};
use crate::observable::Observable;
use crate::peer::{
    PeerConnectionManager, PeerEvent, PeerFactory, ReconnectionController, WebRtcPeerFactory,
};
use crate::room::RoomId;
use crate::signaling::{ChannelEvent, ChannelEventSink, SignalingChannel, WebSocketChannel};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

type ChannelConstructor =
    Box<dyn FnOnce(ChannelEventSink) -> Arc<dyn SignalingChannel> + Send + 'static>;

/// Builder for [`CallSession`]
///
/// Without overrides the session signals over [`WebSocketChannel`], creates
/// connections with [`WebRtcPeerFactory`] and captures with
/// [`TrackMediaSource`].
pub struct CallSessionBuilder {
    config: CallConfig,
    channel: Option<ChannelConstructor>,
    peer_factory: Option<Arc<dyn PeerFactory>>,
    media_source: Option<Arc<dyn MediaSource>>,
}

impl CallSessionBuilder {
    pub fn new(config: CallConfig) -> Self {
        Self {
            config,
            channel: None,
            peer_factory: None,
            media_source: None,
        }
    }

    /// Use a custom signaling channel
    ///
    /// `make` receives the sink the channel must report its events to.
    pub fn with_channel<F>(mut self, make: F) -> Self
    where
        F: FnOnce(ChannelEventSink) -> Arc<dyn SignalingChannel> + Send + 'static,
    {
        self.channel = Some(Box::new(make));
        self
    }

    pub fn with_peer_factory(mut self, factory: Arc<dyn PeerFactory>) -> Self {
        self.peer_factory = Some(factory);
        self
    }

    pub fn with_media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    /// Validate the configuration and start the session task
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<CallSession> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::InternalError(format!("no Tokio runtime: {}", e)))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();

        let channel_events = events_tx.downgrade();
        let sink = ChannelEventSink::new(move |event: ChannelEvent| match channel_events.upgrade() {
            Some(tx) => tx.send(SessionEvent::Channel(event)).is_ok(),
            None => false,
        });
        let channel: Arc<dyn SignalingChannel> = match self.channel {
            Some(make) => make(sink),
            None => Arc::new(WebSocketChannel::new(
                self.config.signaling_url.clone(),
                self.config.signaling.clone(),
                sink,
            )),
        };

        let peer_events = events_tx.downgrade();
        let factory = self
            .peer_factory
            .unwrap_or_else(|| Arc::new(WebRtcPeerFactory::new()));
        let peers = PeerConnectionManager::new(
            factory,
            self.config.ice_servers(),
            move |generation: u64, event: PeerEvent| {
                if let Some(tx) = peer_events.upgrade() {
                    let _ = tx.send(SessionEvent::Peer { generation, event });
                }
            },
        );

        let observers = SessionObservers::new();
        let epoch = Arc::new(AtomicU64::new(0));
        let actor = SessionActor::new(
            channel,
            peers,
            ReconnectionController::new(self.config.recovery.clone()),
            observers.clone(),
            Arc::clone(&epoch),
            events_tx.downgrade(),
        );
        runtime.spawn(actor.run(events_rx));

        info!("Call session started ({})", self.config.signaling_url);
        Ok(CallSession {
            inner: Arc::new(SessionHandle {
                events: events_tx,
                epoch,
                observers,
                media_source: self
                    .media_source
                    .unwrap_or_else(|| Arc::new(TrackMediaSource::new())),
                constraints: self.config.media,
            }),
        })
    }
}

struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    epoch: Arc<AtomicU64>,
    observers: SessionObservers,
    media_source: Arc<dyn MediaSource>,
    constraints: MediaConstraints,
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self
            .events
            .send(SessionEvent::Command(SessionCommand::Shutdown { reply: None }));
    }
}

/// A two-party call
///
/// Cheap to clone; the session stops when the last clone is dropped or
/// [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionHandle>,
}

impl CallSession {
    pub fn builder(config: CallConfig) -> CallSessionBuilder {
        CallSessionBuilder::new(config)
    }

    /// Session with the default channel, peer factory and media source
    pub fn new(config: CallConfig) -> Result<Self> {
        CallSessionBuilder::new(config).build()
    }

    /// Acquire local media and join `room`
    ///
    /// `room` is a room id or a meeting link. Media acquisition is the only
    /// step that waits; if the call is ended meanwhile the acquired stream is
    /// stopped and [`Error::CallEnded`] is returned.
    pub async fn join_room(&self, room: &str) -> Result<()> {
        let room_id = RoomId::parse(room)?;
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        debug!("Acquiring local media for room {}", room_id);
        let stream = match self.inner.media_source.acquire(self.inner.constraints).await {
            Ok(stream) => stream,
            Err(error) => {
                let _ = self.send(SessionCommand::MediaFailed {
                    error: error.clone(),
                });
                return Err(error.into());
            }
        };

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            stream.stop();
            return Err(Error::CallEnded);
        }

        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.send(SessionCommand::StartCall {
            room_id: room_id.into_inner(),
            epoch,
            stream: stream.clone(),
            reply,
        }) {
            stream.stop();
            return Err(e);
        }
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Tear down the peer connection and join the last room again
    pub async fn rejoin(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Rejoin { reply })?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Stop local media, close the peer connection and leave the room
    ///
    /// A join still waiting for media is cancelled.
    pub async fn end_call(&self) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::EndCall { reply: Some(reply) })?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Internal view of the session, after every event queued so far
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply })?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// End the call and stop the session task
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Shutdown { reply: Some(reply) })?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    pub fn state(&self) -> SessionState {
        self.inner.observers.state.get()
    }

    pub fn status(&self) -> String {
        self.inner.observers.status.get()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.inner.observers.remote_stream.get()
    }

    pub fn local_stream(&self) -> Option<LocalStream> {
        self.inner.observers.local_stream.get()
    }

    pub fn state_observable(&self) -> &Observable<SessionState> {
        &self.inner.observers.state
    }

    pub fn status_observable(&self) -> &Observable<String> {
        &self.inner.observers.status
    }

    pub fn remote_stream_observable(&self) -> &Observable<Option<RemoteStream>> {
        &self.inner.observers.remote_stream
    }

    pub fn local_stream_observable(&self) -> &Observable<Option<LocalStream>> {
        &self.inner.observers.local_stream
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.inner
            .events
            .send(SessionEvent::Command(command))
            .map_err(|_| Error::SessionClosed)
    }
}
