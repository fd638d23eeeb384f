//! The single peer connection of a call
//!
//! Holds at most one connection at a time. Installing a new connection tears
//! the old one down first, and each installed connection gets a fresh
//! generation so callbacks still queued from an older one can be told apart.

use super::{PeerEvent, PeerEventSink, PeerFactory, PeerLinkState, RtcPeer, SignalingState};
use crate::config::IceServerConfig;
use crate::media::{LocalStream, RemoteStream, RemoteTrack};
use crate::signaling::{IceCandidate, OutboundMessage, SessionDescription, SignalingChannel};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Deliver = Arc<dyn Fn(u64, PeerEvent) + Send + Sync>;

struct ActivePeer {
    generation: u64,
    peer: Arc<dyn RtcPeer>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    link_state: Option<PeerLinkState>,
}

/// Owner of the peer connection slot and the call's media
pub struct PeerConnectionManager {
    factory: Arc<dyn PeerFactory>,
    ice_servers: Vec<IceServerConfig>,
    deliver: Deliver,
    last_generation: u64,
    active: Option<ActivePeer>,
    local_stream: Option<LocalStream>,
    remote_stream: Option<RemoteStream>,
}

impl PeerConnectionManager {
    /// `deliver` receives every callback of every connection together with
    /// the generation of the connection that raised it
    pub fn new<F>(factory: Arc<dyn PeerFactory>, ice_servers: Vec<IceServerConfig>, deliver: F) -> Self
    where
        F: Fn(u64, PeerEvent) + Send + Sync + 'static,
    {
        Self {
            factory,
            ice_servers,
            deliver: Arc::new(deliver),
            last_generation: 0,
            active: None,
            local_stream: None,
            remote_stream: None,
        }
    }

    pub fn has_peer(&self) -> bool {
        self.active.is_some()
    }

    /// Generation of the installed connection
    pub fn generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    /// Whether `generation` is the installed connection
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == Some(generation)
    }

    pub fn signaling_state(&self) -> Option<SignalingState> {
        self.active.as_ref().map(|a| a.peer.signaling_state())
    }

    /// Last link state observed on the installed connection
    pub fn link_state(&self) -> Option<PeerLinkState> {
        self.active.as_ref().and_then(|a| a.link_state)
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    /// Take ownership of the call's local stream
    ///
    /// A previously held stream with a different id is stopped.
    pub fn set_local_stream(&mut self, stream: LocalStream) {
        if let Some(previous) = self.local_stream.take() {
            if previous.id() != stream.id() {
                previous.stop();
            }
        }
        self.local_stream = Some(stream);
    }

    /// Stop every local track and forget the stream
    pub fn release_local_stream(&mut self) -> Option<LocalStream> {
        let stream = self.local_stream.take()?;
        stream.stop();
        info!("Released local stream {}", stream.id());
        Some(stream)
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn clear_remote_stream(&mut self) -> Option<RemoteStream> {
        self.remote_stream.take()
    }

    /// Add a remote track to the published stream
    ///
    /// Tracks of the current stream id are merged into it; a new stream id
    /// replaces the stream. Returns the stream to publish.
    pub fn merge_remote_track(&mut self, stream_id: &str, track: RemoteTrack) -> RemoteStream {
        match &mut self.remote_stream {
            Some(stream) if stream.id() == stream_id => stream.add_track(track),
            _ => {
                let mut stream = RemoteStream::new(stream_id);
                stream.add_track(track);
                self.remote_stream = Some(stream);
            }
        }
        self.remote_stream
            .clone()
            .unwrap_or_else(|| RemoteStream::new(stream_id))
    }

    /// Replace the connection with a new one carrying the local tracks
    ///
    /// Returns the generation of the new connection.
    pub async fn create_peer_connection(&mut self) -> Result<u64> {
        self.teardown().await;
        if self.active.is_some() {
            return Err(Error::InternalError(
                "peer connection slot still occupied after teardown".to_string(),
            ));
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        let events = PeerEventSink::with_deliver(generation, Arc::clone(&self.deliver));
        let peer = self.factory.create(&self.ice_servers, events).await?;

        if let Some(stream) = &self.local_stream {
            for track in stream.tracks() {
                if let Err(e) = peer.add_local_track(track).await {
                    warn!("Failed to attach local {} track: {}", track.kind(), e);
                }
            }
        }

        self.active = Some(ActivePeer {
            generation,
            peer,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            link_state: None,
        });
        info!("Peer connection {} installed", generation);
        Ok(generation)
    }

    /// Detach every callback and close the connection. No-op without one.
    pub async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.peer.detach_handlers();
        if let Err(e) = active.peer.close().await {
            warn!("Error closing peer connection {}: {}", active.generation, e);
        }
        debug!("Peer connection {} torn down", active.generation);
    }

    /// Create an offer and send it to `target`
    ///
    /// A silent no-op (`Ok(false)`) without a room, without an open channel,
    /// without a connection, or for a non-restart offer without a target.
    pub async fn send_offer(
        &mut self,
        channel: &dyn SignalingChannel,
        room_id: Option<&str>,
        target: Option<&str>,
        ice_restart: bool,
    ) -> Result<bool> {
        let Some(room_id) = room_id else {
            debug!("No room, not sending offer");
            return Ok(false);
        };
        if !ice_restart && target.is_none() {
            debug!("No remote peer, not sending offer");
            return Ok(false);
        }
        if !channel.is_open() {
            debug!("Signaling channel not open, not sending offer");
            return Ok(false);
        }
        let Some(active) = &self.active else {
            debug!("No peer connection, not sending offer");
            return Ok(false);
        };

        let offer = active.peer.create_offer(ice_restart).await?;
        let sent = channel.send(OutboundMessage::offer(offer, room_id, target));
        if sent {
            debug!(
                "Sent {}offer to {}",
                if ice_restart { "ICE-restart " } else { "" },
                target.unwrap_or("room")
            );
        }
        Ok(sent)
    }

    /// Apply a remote offer and reply with an answer
    pub async fn answer_offer(
        &mut self,
        channel: &dyn SignalingChannel,
        room_id: Option<&str>,
        sender_id: &str,
        offer: SessionDescription,
    ) -> Result<bool> {
        self.apply_remote_description(offer).await?;

        let active = self.active_peer()?;
        let answer = active.peer.create_answer().await?;

        let Some(room_id) = room_id else {
            debug!("No room, answer not sent");
            return Ok(false);
        };
        Ok(channel.send(OutboundMessage::answer(answer, room_id, sender_id)))
    }

    /// Apply the remote answer to our offer
    pub async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()> {
        self.apply_remote_description(answer).await
    }

    /// Add a remote candidate, or buffer it until the remote description is set
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let Some(active) = &mut self.active else {
            debug!("No peer connection, dropping remote candidate");
            return Ok(());
        };
        if !active.remote_description_set {
            active.pending_candidates.push(candidate);
            debug!(
                "Buffered remote candidate ({} pending)",
                active.pending_candidates.len()
            );
            return Ok(());
        }
        active.peer.add_ice_candidate(candidate).await
    }

    /// Forward a locally gathered candidate to the remote peer
    pub fn forward_local_candidate(
        &self,
        channel: &dyn SignalingChannel,
        room_id: Option<&str>,
        target: Option<&str>,
        candidate: Option<IceCandidate>,
    ) -> bool {
        match (candidate, room_id, target) {
            (Some(candidate), Some(room_id), Some(target)) => {
                channel.send(OutboundMessage::ice_candidate(candidate, room_id, target))
            }
            _ => false,
        }
    }

    /// Record a link state report; `false` if it repeats the last one
    pub fn observe_link_state(&mut self, state: PeerLinkState) -> bool {
        let Some(active) = &mut self.active else {
            return false;
        };
        if active.link_state == Some(state) {
            return false;
        }
        debug!(
            "Peer connection {} link {:?} -> {}",
            active.generation, active.link_state, state
        );
        active.link_state = Some(state);
        true
    }

    /// Tear down the connection and stop the local tracks
    pub async fn shutdown(&mut self) {
        self.teardown().await;
        self.release_local_stream();
        self.remote_stream = None;
    }

    fn active_peer(&self) -> Result<&ActivePeer> {
        self.active
            .as_ref()
            .ok_or_else(|| Error::PeerConnectionError("no peer connection".to_string()))
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::PeerConnectionError("no peer connection".to_string()))?;

        active.peer.set_remote_description(description).await?;
        active.remote_description_set = true;

        let pending = std::mem::take(&mut active.pending_candidates);
        if !pending.is_empty() {
            debug!("Applying {} buffered remote candidate(s)", pending.len());
        }
        for candidate in pending {
            if let Err(e) = active.peer.add_ice_candidate(candidate).await {
                warn!("Failed to apply buffered candidate: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.peer.detach_handlers();
        }
        if let Some(stream) = &self.local_stream {
            stream.stop();
        }
    }
}
