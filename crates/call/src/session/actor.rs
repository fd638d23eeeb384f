//! Session task
//!
//! One task per session owns the state machine, the peer connection manager
//! and the reconnection controller. Channel events, peer callbacks, timer
//! firings and handle commands are all posted to one queue and handled one
//! at a time, in order.

use super::state::{SessionObservers, SessionSnapshot, SessionState};
use super::status;
use crate::media::{LocalStream, MediaAccessError};
use crate::peer::{
    PeerConnectionManager, PeerEvent, PeerLinkState, ReconnectionController, RestartDecision,
    SignalingState,
};
use crate::signaling::{ChannelEvent, InboundMessage, SignalingChannel};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Everything the session task reacts to
pub(crate) enum SessionEvent {
    Channel(ChannelEvent),
    Peer { generation: u64, event: PeerEvent },
    RestartTimer { token: u64 },
    Command(SessionCommand),
}

pub(crate) enum SessionCommand {
    StartCall {
        room_id: String,
        epoch: u64,
        stream: LocalStream,
        reply: oneshot::Sender<Result<()>>,
    },
    MediaFailed {
        error: MediaAccessError,
    },
    Rejoin {
        reply: oneshot::Sender<Result<()>>,
    },
    EndCall {
        reply: Option<oneshot::Sender<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
}

pub(crate) struct SessionActor {
    channel: Arc<dyn SignalingChannel>,
    peers: PeerConnectionManager,
    recovery: ReconnectionController,
    observers: SessionObservers,
    room_id: Option<String>,
    remote_peer_id: Option<String>,
    epoch: Arc<AtomicU64>,
    timer_events: mpsc::WeakUnboundedSender<SessionEvent>,
}

impl SessionActor {
    pub(crate) fn new(
        channel: Arc<dyn SignalingChannel>,
        peers: PeerConnectionManager,
        recovery: ReconnectionController,
        observers: SessionObservers,
        epoch: Arc<AtomicU64>,
        timer_events: mpsc::WeakUnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            channel,
            peers,
            recovery,
            observers,
            room_id: None,
            remote_peer_id: None,
            epoch,
            timer_events,
        }
    }

    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        debug!("Session task started");
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Command(SessionCommand::Shutdown { reply }) => {
                    self.shutdown().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
                SessionEvent::Channel(event) => self.on_channel_event(event).await,
                SessionEvent::Peer { generation, event } => {
                    self.on_peer_event(generation, event).await
                }
                SessionEvent::RestartTimer { token } => self.on_restart_timer(token).await,
                SessionEvent::Command(command) => self.on_command(command).await,
            }
        }
        debug!("Session task stopped");
    }

    fn state(&self) -> SessionState {
        self.observers.state.get()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.observers.state.get();
        if self.observers.state.set(state) {
            info!("Session state {} -> {}", previous, state);
        }
    }

    fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("Status: {}", message);
        self.observers.status.set(message);
    }

    // ---- signaling channel ----

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.set_state(SessionState::Connected);
                self.set_status(status::SIGNALING_CONNECTED);
            }
            ChannelEvent::Reconnected { attempt } => {
                info!("Signaling channel back after {} drop(s)", attempt);
            }
            ChannelEvent::Disconnected { reason } => {
                debug!("Signaling channel dropped: {}", reason);
                self.set_state(SessionState::Disconnected);
                self.set_status(status::SIGNALING_LOST);
                if self.peers.has_peer() {
                    self.schedule_restart_check();
                }
            }
            ChannelEvent::ConnectError { message } => {
                self.set_state(SessionState::Disconnected);
                self.set_status(status::connect_error(&message));
            }
            ChannelEvent::ReconnectFailed => {
                self.set_state(SessionState::Disconnected);
                self.set_status(status::SIGNALING_GAVE_UP);
            }
            ChannelEvent::Message(message) => self.on_message(message).await,
        }
    }

    async fn on_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::PeerJoined { peer_id } => {
                info!("Peer {} joined", peer_id);
                self.remote_peer_id = Some(peer_id);
                self.set_state(SessionState::PeerJoined);
                self.set_status(status::PEER_JOINED);
                if self.install_peer_connection().await {
                    self.send_offer(false).await;
                }
            }
            InboundMessage::ExistingPeers(peers) => match peers.into_iter().next() {
                Some(peer_id) => {
                    info!("Joined room with peer {}", peer_id);
                    self.remote_peer_id = Some(peer_id);
                    self.set_state(SessionState::PeerJoined);
                    self.set_status(status::PEER_JOINED);
                }
                None => self.set_status(status::WAITING_FOR_PEER),
            },
            InboundMessage::Offer { offer, sender_id } => {
                debug!("Offer from {}", sender_id);
                self.remote_peer_id = Some(sender_id.clone());
                if !matches!(self.state(), SessionState::ConnectedPeer | SessionState::Failed) {
                    self.set_state(SessionState::PeerJoined);
                }
                if !self.peers.has_peer() && !self.install_peer_connection().await {
                    return;
                }
                let result = self
                    .peers
                    .answer_offer(
                        self.channel.as_ref(),
                        self.room_id.as_deref(),
                        &sender_id,
                        offer,
                    )
                    .await;
                if let Err(e) = result {
                    warn!("Failed to answer offer from {}: {}", sender_id, e);
                }
            }
            InboundMessage::Answer { answer, sender_id } => {
                debug!("Answer from {}", sender_id);
                if let Err(e) = self.peers.apply_answer(answer).await {
                    warn!("Failed to apply answer from {}: {}", sender_id, e);
                }
            }
            InboundMessage::IceCandidate {
                candidate,
                sender_id,
            } => match candidate {
                Some(candidate) => {
                    if let Err(e) = self.peers.add_remote_candidate(candidate).await {
                        warn!("Failed to add candidate from {}: {}", sender_id, e);
                    }
                }
                None => debug!("End of candidates from {}", sender_id),
            },
            InboundMessage::PeerLeft { peer_id } => {
                if let (Some(left), Some(current)) = (&peer_id, &self.remote_peer_id) {
                    if left != current {
                        debug!("Ignoring peerLeft for unknown peer {}", left);
                        return;
                    }
                }
                info!("Peer left");
                self.end_peer(SessionState::PeerLeft, status::PEER_LEFT)
                    .await;
            }
            InboundMessage::PeerDisconnected { peer_id } => {
                if self.remote_peer_id.as_deref() != Some(peer_id.as_str()) {
                    debug!("Ignoring peerDisconnected for {}", peer_id);
                    return;
                }
                info!("Peer {} disconnected", peer_id);
                self.end_peer(SessionState::Disconnected, status::PEER_DISCONNECTED)
                    .await;
            }
            InboundMessage::RoomError { message } => {
                warn!("Room error: {}", message);
                self.set_status(status::room_error(&message));
            }
        }
    }

    // ---- peer connection ----

    async fn install_peer_connection(&mut self) -> bool {
        match self.peers.create_peer_connection().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to create peer connection: {}", e);
                self.set_status(status::peer_setup_failed(&e.to_string()));
                false
            }
        }
    }

    async fn send_offer(&mut self, ice_restart: bool) {
        let result = self
            .peers
            .send_offer(
                self.channel.as_ref(),
                self.room_id.as_deref(),
                self.remote_peer_id.as_deref(),
                ice_restart,
            )
            .await;
        match result {
            Ok(true) => {}
            Ok(false) => debug!("Offer not sent"),
            Err(e) => warn!("Failed to send offer: {}", e),
        }
    }

    /// The remote participant is gone: drop the connection and remote media,
    /// keep the local stream for the next participant
    async fn end_peer(&mut self, state: SessionState, message: &str) {
        self.recovery.reset();
        self.peers.teardown().await;
        self.peers.clear_remote_stream();
        self.observers.remote_stream.set(None);
        self.remote_peer_id = None;
        self.set_state(state);
        self.set_status(message);
    }

    async fn on_peer_event(&mut self, generation: u64, event: PeerEvent) {
        if !self.peers.is_current(generation) {
            debug!("Discarding event of replaced peer connection {}", generation);
            return;
        }

        match event {
            PeerEvent::Track { stream_id, track } => {
                debug!("Remote {} track {} on {}", track.kind(), track.id(), stream_id);
                let stream = self.peers.merge_remote_track(&stream_id, track);
                self.observers.remote_stream.replace(Some(stream));
                self.set_state(SessionState::ConnectedPeer);
                self.set_status(status::IN_CALL);
                self.recovery.on_connected();
            }
            PeerEvent::LocalCandidate(candidate) => {
                self.peers.forward_local_candidate(
                    self.channel.as_ref(),
                    self.room_id.as_deref(),
                    self.remote_peer_id.as_deref(),
                    candidate,
                );
            }
            PeerEvent::ConnectionState(link) | PeerEvent::IceConnectionState(link) => {
                if self.peers.observe_link_state(link) {
                    self.on_link_state(link).await;
                }
            }
            PeerEvent::NegotiationNeeded => {
                if self.peers.signaling_state() == Some(SignalingState::Stable)
                    && self.remote_peer_id.is_some()
                {
                    self.send_offer(false).await;
                } else {
                    debug!("Negotiation needed while not stable, skipping offer");
                }
            }
        }
    }

    async fn on_link_state(&mut self, link: PeerLinkState) {
        match link {
            PeerLinkState::Failed => {
                if self.state().in_call() {
                    self.set_state(SessionState::Failed);
                }
                self.recovery.cancel_pending();
                self.attempt_restart().await;
            }
            PeerLinkState::Disconnected => {
                if self.state().in_call() {
                    self.set_state(SessionState::Disconnected);
                }
                self.schedule_restart_check();
            }
            PeerLinkState::Connected => {
                if !self.resume_call() {
                    self.recovery.cancel_pending();
                }
            }
            PeerLinkState::New | PeerLinkState::Checking | PeerLinkState::Closed => {}
        }
    }

    // ---- recovery ----

    fn schedule_restart_check(&mut self) {
        let events = self.timer_events.clone();
        self.recovery.schedule(move |token| {
            if let Some(events) = events.upgrade() {
                let _ = events.send(SessionEvent::RestartTimer { token });
            }
        });
    }

    async fn on_restart_timer(&mut self, token: u64) {
        if !self.recovery.take_fired(token) {
            return;
        }
        if !self.peers.has_peer() {
            debug!("Restart check fired without a peer connection");
            return;
        }
        if self.peers.link_state() == Some(PeerLinkState::Connected) {
            debug!("Peer link recovered before the restart check");
            self.resume_call();
            return;
        }
        self.attempt_restart().await;
    }

    /// Back to `connected-peer` once media is flowing; false without a remote stream
    fn resume_call(&mut self) -> bool {
        if self.peers.remote_stream().is_none() {
            return false;
        }
        self.set_state(SessionState::ConnectedPeer);
        self.set_status(status::IN_CALL);
        self.recovery.on_connected();
        true
    }

    async fn attempt_restart(&mut self) {
        match self.recovery.begin_attempt() {
            RestartDecision::Attempt(attempt) => {
                self.set_status(status::restarting(attempt, self.recovery.max_attempts()));
                self.send_offer(true).await;
            }
            RestartDecision::Exhausted => {
                self.set_state(SessionState::Disconnected);
                self.set_status(status::RECOVERY_FAILED);
            }
        }
    }

    // ---- commands ----

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartCall {
                room_id,
                epoch,
                stream,
                reply,
            } => {
                let result = self.start_call(room_id, epoch, stream).await;
                let _ = reply.send(result);
            }
            SessionCommand::MediaFailed { error } => {
                warn!("Local media unavailable: {}", error);
                self.set_status(error.user_message());
            }
            SessionCommand::Rejoin { reply } => {
                let result = self.rejoin().await;
                let _ = reply.send(result);
            }
            SessionCommand::EndCall { reply } => {
                self.end_call().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown { .. } => {}
        }
    }

    async fn start_call(&mut self, room_id: String, epoch: u64, stream: LocalStream) -> Result<()> {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            info!("Call ended while local media was being acquired");
            stream.stop();
            return Err(Error::CallEnded);
        }

        if self.room_id.is_some() || self.peers.has_peer() {
            debug!("Replacing the current call");
            self.recovery.reset();
            self.peers.teardown().await;
            self.peers.clear_remote_stream();
            self.observers.remote_stream.set(None);
            self.remote_peer_id = None;
        }

        self.peers.set_local_stream(stream.clone());
        self.observers.local_stream.replace(Some(stream));
        self.room_id = Some(room_id.clone());
        self.set_status(status::joining(&room_id));

        info!("Joining room {}", room_id);
        self.channel.join_room(&room_id);
        if self.channel.is_open() {
            self.set_state(SessionState::Connected);
        }
        Ok(())
    }

    async fn rejoin(&mut self) -> Result<()> {
        let room_id = self
            .room_id
            .clone()
            .ok_or_else(|| Error::InvalidRoom("no room to rejoin".to_string()))?;

        info!("Rejoining room {}", room_id);
        self.recovery.reset();
        self.peers.teardown().await;
        self.peers.clear_remote_stream();
        self.observers.remote_stream.set(None);
        self.remote_peer_id = None;
        if self.channel.is_open() {
            self.set_state(SessionState::Connected);
        }
        self.set_status(status::joining(&room_id));
        self.channel.join_room(&room_id);
        Ok(())
    }

    async fn end_call(&mut self) {
        info!("Ending call");
        self.recovery.reset();
        self.peers.shutdown().await;
        self.observers.remote_stream.set(None);
        self.observers.local_stream.replace(None);
        self.remote_peer_id = None;
        self.room_id = None;
        self.channel.disconnect();
        self.set_state(SessionState::Disconnected);
        self.set_status(status::CALL_ENDED);
    }

    async fn shutdown(&mut self) {
        if self.room_id.is_some() || self.peers.has_peer() || self.peers.local_stream().is_some() {
            self.end_call().await;
        } else {
            self.channel.disconnect();
        }
        self.observers.close();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            room_id: self.room_id.clone(),
            remote_peer_id: self.remote_peer_id.clone(),
            channel_status: self.channel.status(),
            has_peer_connection: self.peers.has_peer(),
            peer_generation: self.peers.generation(),
            restart_attempts: self.recovery.attempts(),
            restart_pending: self.recovery.has_pending(),
            recovery_exhausted: self.recovery.is_exhausted(),
            local_stream_active: self
                .peers
                .local_stream()
                .map(|s| !s.is_stopped())
                .unwrap_or(false),
            remote_stream_id: self.peers.remote_stream().map(|s| s.id().to_string()),
        }
    }
}
