//! Scripted stand-ins for the signaling channel, peer connections and media

use async_trait::async_trait;
use parking_lot::Mutex;
use rtc_call::config::IceServerConfig;
use rtc_call::peer::{PeerEvent, PeerEventSink, SignalingState};
use rtc_call::signaling::protocol::{AnswerPayload, CandidatePayload, OfferPayload};
use rtc_call::signaling::{
    ChannelEvent, ChannelEventSink, ChannelStatus, IceCandidate, InboundMessage,
    OutboundMessage, SdpType, SessionDescription,
};
use rtc_call::{
    Error, LocalStream, LocalTrack, MediaAccessError, MediaConstraints, MediaKind, MediaSource,
    PeerFactory, PeerLinkState, RemoteTrack, Result, RtcPeer, SignalingChannel,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

// ============================================================================
// Signaling channel
// ============================================================================

#[derive(Debug)]
struct ChannelRecord {
    status: ChannelStatus,
    room: Option<String>,
    sent: Vec<OutboundMessage>,
    joins: Vec<String>,
    connects: u32,
    disconnects: u32,
}

/// In-memory signaling channel
///
/// With `auto_open` a connect opens the channel at once and reports
/// `Connected`; otherwise the channel stays `Connecting` until [`open`] is
/// called.
///
/// [`open`]: FakeChannel::open
pub struct FakeChannel {
    sink: ChannelEventSink,
    auto_open: bool,
    record: Mutex<ChannelRecord>,
}

impl FakeChannel {
    pub fn new(sink: ChannelEventSink, auto_open: bool) -> Arc<Self> {
        Arc::new(Self {
            sink,
            auto_open,
            record: Mutex::new(ChannelRecord {
                status: ChannelStatus::Idle,
                room: None,
                sent: Vec::new(),
                joins: Vec::new(),
                connects: 0,
                disconnects: 0,
            }),
        })
    }

    /// Open the channel, report `Connected` and replay the room
    pub fn open(&self) {
        {
            let mut record = self.record.lock();
            record.status = ChannelStatus::Open;
            if let Some(room) = record.room.clone() {
                record.joins.push(room);
            }
        }
        self.sink.emit(ChannelEvent::Connected);
    }

    /// Simulate the server dropping the socket
    pub fn drop_connection(&self, reason: &str) {
        self.record.lock().status = ChannelStatus::Connecting;
        self.sink.emit(ChannelEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn emit(&self, event: ChannelEvent) {
        self.sink.emit(event);
    }

    pub fn inject(&self, message: InboundMessage) {
        self.sink.emit(ChannelEvent::Message(message));
    }

    pub fn inject_peer_joined(&self, peer_id: &str) {
        self.inject(InboundMessage::PeerJoined {
            peer_id: peer_id.to_string(),
        });
    }

    pub fn inject_offer(&self, sender_id: &str) {
        self.inject(InboundMessage::Offer {
            offer: SessionDescription::offer(format!("remote-offer-from-{}", sender_id)),
            sender_id: sender_id.to_string(),
        });
    }

    pub fn inject_answer(&self, sender_id: &str) {
        self.inject(InboundMessage::Answer {
            answer: SessionDescription::answer(format!("remote-answer-from-{}", sender_id)),
            sender_id: sender_id.to_string(),
        });
    }

    pub fn inject_candidate(&self, sender_id: &str, candidate: &str) {
        self.inject(InboundMessage::IceCandidate {
            candidate: Some(IceCandidate {
                candidate: candidate.to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
                username_fragment: None,
            }),
            sender_id: sender_id.to_string(),
        });
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.record.lock().sent.clone()
    }

    pub fn offers(&self) -> Vec<OfferPayload> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Offer(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<AnswerPayload> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Answer(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn candidates(&self) -> Vec<CandidatePayload> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::IceCandidate(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    /// Rooms joined, in order, including replays
    pub fn joins(&self) -> Vec<String> {
        self.record.lock().joins.clone()
    }

    pub fn connect_calls(&self) -> u32 {
        self.record.lock().connects
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.record.lock().disconnects
    }
}

impl SignalingChannel for FakeChannel {
    fn connect(&self) {
        let opened = {
            let mut record = self.record.lock();
            if matches!(record.status, ChannelStatus::Open | ChannelStatus::Connecting) {
                return;
            }
            record.connects += 1;
            if self.auto_open {
                record.status = ChannelStatus::Open;
                if let Some(room) = record.room.clone() {
                    record.joins.push(room);
                }
                true
            } else {
                record.status = ChannelStatus::Connecting;
                false
            }
        };
        if opened {
            self.sink.emit(ChannelEvent::Connected);
        }
    }

    fn join_room(&self, room_id: &str) {
        let open = {
            let mut record = self.record.lock();
            record.room = Some(room_id.to_string());
            if record.status == ChannelStatus::Open {
                record.joins.push(room_id.to_string());
            }
            record.status == ChannelStatus::Open
        };
        if !open {
            self.connect();
        }
    }

    fn send(&self, message: OutboundMessage) -> bool {
        let mut record = self.record.lock();
        if record.status != ChannelStatus::Open {
            return false;
        }
        record.sent.push(message);
        true
    }

    fn disconnect(&self) {
        let mut record = self.record.lock();
        record.status = ChannelStatus::Closed;
        record.room = None;
        record.disconnects += 1;
    }

    fn status(&self) -> ChannelStatus {
        self.record.lock().status
    }

    fn current_room(&self) -> Option<String> {
        self.record.lock().room.clone()
    }
}

// ============================================================================
// Peer connections
// ============================================================================

#[derive(Debug)]
struct PeerRecord {
    signaling: SignalingState,
    offers: Vec<bool>,
    answers: u32,
    remote: Vec<SdpType>,
    candidates: Vec<String>,
    local_tracks: Vec<String>,
    detached: bool,
    closed: bool,
}

/// Scripted peer connection
///
/// Follows the offer/answer state machine closely enough to reject an answer
/// without a local offer, and rejects candidates containing `malformed`.
pub struct FakePeer {
    events: PeerEventSink,
    auto_connect: bool,
    record: Mutex<PeerRecord>,
}

impl FakePeer {
    fn new(events: PeerEventSink, auto_connect: bool) -> Self {
        Self {
            events,
            auto_connect,
            record: Mutex::new(PeerRecord {
                signaling: SignalingState::Stable,
                offers: Vec::new(),
                answers: 0,
                remote: Vec::new(),
                candidates: Vec::new(),
                local_tracks: Vec::new(),
                detached: false,
                closed: false,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    /// Raise a callback, unless handlers were detached
    pub fn emit(&self, event: PeerEvent) {
        if self.record.lock().detached {
            return;
        }
        self.events.emit(event);
    }

    /// Raise a callback even after detach, like one already in flight
    pub fn emit_in_flight(&self, event: PeerEvent) {
        self.events.emit(event);
    }

    pub fn emit_link(&self, state: PeerLinkState) {
        self.emit(PeerEvent::ConnectionState(state));
    }

    pub fn emit_ice(&self, state: PeerLinkState) {
        self.emit(PeerEvent::IceConnectionState(state));
    }

    pub fn emit_track(&self, stream_id: &str, track_id: &str, kind: MediaKind) {
        self.emit(PeerEvent::Track {
            stream_id: stream_id.to_string(),
            track: RemoteTrack::new(track_id, kind),
        });
    }

    pub fn emit_local_candidate(&self, candidate: &str) {
        self.emit(PeerEvent::LocalCandidate(Some(IceCandidate {
            candidate: candidate.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        })));
    }

    pub fn set_signaling_state(&self, state: SignalingState) {
        self.record.lock().signaling = state;
    }

    /// `ice_restart` flag of every offer created, in order
    pub fn offers(&self) -> Vec<bool> {
        self.record.lock().offers.clone()
    }

    pub fn restart_offers(&self) -> usize {
        self.offers().iter().filter(|restart| **restart).count()
    }

    pub fn answers(&self) -> u32 {
        self.record.lock().answers
    }

    pub fn remote_descriptions(&self) -> Vec<SdpType> {
        self.record.lock().remote.clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.record.lock().candidates.clone()
    }

    pub fn local_tracks(&self) -> Vec<String> {
        self.record.lock().local_tracks.clone()
    }

    pub fn is_detached(&self) -> bool {
        self.record.lock().detached
    }

    pub fn is_closed(&self) -> bool {
        self.record.lock().closed
    }

    fn negotiated(&self) {
        if !self.auto_connect {
            return;
        }
        let generation = self.generation();
        self.emit(PeerEvent::Track {
            stream_id: format!("remote-stream-{}", generation),
            track: RemoteTrack::new(format!("remote-audio-{}", generation), MediaKind::Audio),
        });
        self.emit(PeerEvent::ConnectionState(PeerLinkState::Connected));
    }
}

#[async_trait]
impl RtcPeer for FakePeer {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<()> {
        self.record.lock().local_tracks.push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let mut record = self.record.lock();
        if record.closed {
            return Err(Error::PeerConnectionError("closed".to_string()));
        }
        record.offers.push(ice_restart);
        record.signaling = SignalingState::HaveLocalOffer;
        Ok(SessionDescription::offer(format!(
            "fake-offer-{}-{}",
            self.generation(),
            record.offers.len()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        {
            let mut record = self.record.lock();
            if record.signaling != SignalingState::HaveRemoteOffer {
                return Err(Error::SdpError(format!(
                    "cannot answer in {:?}",
                    record.signaling
                )));
            }
            record.signaling = SignalingState::Stable;
            record.answers += 1;
        }
        self.negotiated();
        Ok(SessionDescription::answer(format!(
            "fake-answer-{}",
            self.generation()
        )))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let answered = {
            let mut record = self.record.lock();
            match description.sdp_type {
                SdpType::Offer => {
                    if record.signaling == SignalingState::HaveLocalOffer {
                        return Err(Error::SdpError("offer collision".to_string()));
                    }
                    record.signaling = SignalingState::HaveRemoteOffer;
                }
                SdpType::Answer => {
                    if record.signaling != SignalingState::HaveLocalOffer {
                        return Err(Error::SdpError(format!(
                            "unexpected answer in {:?}",
                            record.signaling
                        )));
                    }
                    record.signaling = SignalingState::Stable;
                }
            }
            record.remote.push(description.sdp_type);
            description.sdp_type == SdpType::Answer
        };
        if answered {
            self.negotiated();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate.contains("malformed") {
            return Err(Error::IceCandidateError(candidate.candidate));
        }
        self.record.lock().candidates.push(candidate.candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.record.lock().signaling
    }

    fn detach_handlers(&self) {
        self.record.lock().detached = true;
    }

    async fn close(&self) -> Result<()> {
        let mut record = self.record.lock();
        record.closed = true;
        record.signaling = SignalingState::Closed;
        Ok(())
    }
}

/// Hands out [`FakePeer`]s and keeps every one it created
pub struct FakePeerFactory {
    auto_connect: bool,
    fail_next: AtomicU32,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: false,
            fail_next: AtomicU32::new(0),
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Peers that report a remote track and a connected link as soon as
    /// offer and answer are both applied
    pub fn auto_connecting() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: true,
            fail_next: AtomicU32::new(0),
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Fail the next `count` creations
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn RtcPeer>> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::PeerConnectionError("scripted failure".to_string()));
        }

        let peer = Arc::new(FakePeer::new(events, self.auto_connect));
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ============================================================================
// Media
// ============================================================================

/// Media source with scripted failures and an optional gate
pub struct FakeMediaSource {
    error: Mutex<Option<MediaAccessError>>,
    gated: bool,
    /// Notified when an acquisition starts
    pub entered: Notify,
    /// Lets a gated acquisition finish
    pub release: Notify,
    acquired: Mutex<Vec<LocalStream>>,
}

impl FakeMediaSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, false))
    }

    pub fn failing(error: MediaAccessError) -> Arc<Self> {
        Arc::new(Self::build(Some(error), false))
    }

    /// Acquisitions wait for `release` before returning
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(None, true))
    }

    fn build(error: Option<MediaAccessError>, gated: bool) -> Self {
        Self {
            error: Mutex::new(error),
            gated,
            entered: Notify::new(),
            release: Notify::new(),
            acquired: Mutex::new(Vec::new()),
        }
    }

    pub fn set_error(&self, error: Option<MediaAccessError>) {
        *self.error.lock() = error;
    }

    pub fn acquired(&self) -> Vec<LocalStream> {
        self.acquired.lock().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<LocalStream, MediaAccessError> {
        self.entered.notify_one();
        if self.gated {
            self.release.notified().await;
        }
        if let Some(error) = self.error.lock().clone() {
            return Err(error);
        }

        let n = self.acquired.lock().len() + 1;
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(format!("local-audio-{}", n), MediaKind::Audio));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(format!("local-video-{}", n), MediaKind::Video));
        }
        let stream = LocalStream::new(format!("local-{}", n), tracks);
        self.acquired.lock().push(stream.clone());
        Ok(stream)
    }
}
