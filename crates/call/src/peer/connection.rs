//! WebRTC peer connection backed by the `webrtc` crate

use super::{PeerEvent, PeerEventSink, PeerFactory, PeerLinkState, RtcPeer, SignalingState};
use crate::config::IceServerConfig;
use crate::media::{LocalTrack, MediaKind, RemoteTrack};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Creates [`WebRtcPeer`]s with the default codecs and interceptors
#[derive(Debug, Default, Clone)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn RtcPeer>> {
        let peer = WebRtcPeer::new(ice_servers, events).await?;
        Ok(Arc::new(peer))
    }
}

/// One `RTCPeerConnection` with its callbacks routed to a [`PeerEventSink`]
pub struct WebRtcPeer {
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcPeer {
    #[instrument(skip(ice_servers, events), fields(generation = events.generation()))]
    pub async fn new(ice_servers: &[IceServerConfig], events: PeerEventSink) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!("Creating peer connection {}", connection_id);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        register_handlers(&peer_connection, events);

        Ok(Self {
            connection_id,
            peer_connection,
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Underlying `RTCPeerConnection`
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    async fn local_description(&self, sdp_type: SdpType) -> Result<SessionDescription> {
        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description after negotiation".to_string()))?;
        Ok(SessionDescription {
            sdp_type,
            sdp: local.sdp,
        })
    }
}

fn register_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEventSink) {
    let sink = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    other => {
                        warn!("Ignoring remote track of kind {:?}", other);
                        return;
                    }
                };
                let stream_id = track.stream_id();
                debug!("Remote {} track on stream {}", kind, stream_id);
                sink.emit(PeerEvent::Track {
                    stream_id,
                    track: RemoteTrack::from_webrtc(track, kind),
                });
            })
        },
    ));

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            let candidate = match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => Some(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => {
                        warn!("Failed to serialize local ICE candidate: {}", e);
                        return;
                    }
                },
                None => None,
            };
            sink.emit(PeerEvent::LocalCandidate(candidate));
        })
    }));

    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            if let Some(state) = map_connection_state(state) {
                sink.emit(PeerEvent::ConnectionState(state));
            }
        })
    }));

    let sink = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            if let Some(state) = map_ice_state(state) {
                sink.emit(PeerEvent::IceConnectionState(state));
            }
        })
    }));

    let sink = events;
    pc.on_negotiation_needed(Box::new(move || {
        let sink = sink.clone();
        Box::pin(async move {
            sink.emit(PeerEvent::NegotiationNeeded);
        })
    }));
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<PeerLinkState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerLinkState::New),
        RTCPeerConnectionState::Connecting => Some(PeerLinkState::Checking),
        RTCPeerConnectionState::Connected => Some(PeerLinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerLinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerLinkState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerLinkState::Closed),
        _ => None,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<PeerLinkState> {
    match state {
        RTCIceConnectionState::New => Some(PeerLinkState::New),
        RTCIceConnectionState::Checking => Some(PeerLinkState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(PeerLinkState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(PeerLinkState::Disconnected),
        RTCIceConnectionState::Failed => Some(PeerLinkState::Failed),
        RTCIceConnectionState::Closed => Some(PeerLinkState::Closed),
        _ => None,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse session description: {}", e)))
}

#[async_trait]
impl RtcPeer for WebRtcPeer {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<()> {
        let Some(sample_track) = track.sample_track() else {
            debug!("Local track {} has no RTP sink, not sending it", track.id());
            return Ok(());
        };

        let sender = self
            .peer_connection
            .add_track(Arc::clone(sample_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e))
            })?;

        // RTCP has to be drained for the interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        debug!("Added local {} track {}", track.kind(), track.id());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });

        let offer = self
            .peer_connection
            .create_offer(options)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_description(SdpType::Offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_description(SdpType::Answer).await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    fn signaling_state(&self) -> SignalingState {
        match self.peer_connection.signaling_state() {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    fn detach_handlers(&self) {
        let pc = &self.peer_connection;
        pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
        pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        pc.on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_ice_connection_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);
        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}
