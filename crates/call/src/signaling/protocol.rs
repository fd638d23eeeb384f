//! Signaling wire protocol
//!
//! Every message travels as one WebSocket text frame:
//!
//! ```json
//! {"event": "offer", "data": {"offer": {"type": "offer", "sdp": "..."}, "roomId": "abc", "targetPeerId": "p2"}}
//! ```
//!
//! Outbound events are `joinRoom`, `offer`, `answer` and `iceCandidate`.
//! The server sends `peerJoined`, `offer`, `answer`, `iceCandidate`,
//! `peerLeft`, `peerDisconnected`, `existingPeers` and `roomError`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire event names
pub mod events {
    pub const JOIN_ROOM: &str = "joinRoom";
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE_CANDIDATE: &str = "iceCandidate";
    pub const PEER_JOINED: &str = "peerJoined";
    pub const PEER_LEFT: &str = "peerLeft";
    pub const PEER_DISCONNECTED: &str = "peerDisconnected";
    pub const EXISTING_PEERS: &str = "existingPeers";
    pub const ROOM_ERROR: &str = "roomError";
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as exchanged between browsers: `{"type", "sdp"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in `RTCIceCandidateInit` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Payload of an `offer` event
///
/// Outbound frames carry `roomId`/`targetPeerId`; the server adds `senderId`
/// when relaying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub offer: SessionDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

/// Payload of an `answer` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub answer: SessionDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

/// Payload of an `iceCandidate` event; a `null` candidate marks end of gathering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "joinRoom")]
    JoinRoom(String),

    #[serde(rename = "offer")]
    Offer(OfferPayload),

    #[serde(rename = "answer")]
    Answer(AnswerPayload),

    #[serde(rename = "iceCandidate")]
    IceCandidate(CandidatePayload),
}

impl OutboundMessage {
    pub fn join_room(room_id: impl Into<String>) -> Self {
        OutboundMessage::JoinRoom(room_id.into())
    }

    pub fn offer(offer: SessionDescription, room_id: &str, target_peer_id: Option<&str>) -> Self {
        OutboundMessage::Offer(OfferPayload {
            offer,
            room_id: Some(room_id.to_string()),
            target_peer_id: target_peer_id.map(str::to_string),
            sender_id: None,
        })
    }

    pub fn answer(answer: SessionDescription, room_id: &str, target_peer_id: &str) -> Self {
        OutboundMessage::Answer(AnswerPayload {
            answer,
            room_id: Some(room_id.to_string()),
            target_peer_id: Some(target_peer_id.to_string()),
            sender_id: None,
        })
    }

    pub fn ice_candidate(candidate: IceCandidate, room_id: &str, target_peer_id: &str) -> Self {
        OutboundMessage::IceCandidate(CandidatePayload {
            candidate: Some(candidate),
            room_id: Some(room_id.to_string()),
            target_peer_id: Some(target_peer_id.to_string()),
            sender_id: None,
        })
    }

    /// Wire event name
    pub fn event(&self) -> &'static str {
        match self {
            OutboundMessage::JoinRoom(_) => events::JOIN_ROOM,
            OutboundMessage::Offer(_) => events::OFFER,
            OutboundMessage::Answer(_) => events::ANSWER,
            OutboundMessage::IceCandidate(_) => events::ICE_CANDIDATE,
        }
    }

    /// Encode as a text frame
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the signaling server
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    PeerJoined {
        peer_id: String,
    },
    Offer {
        offer: SessionDescription,
        sender_id: String,
    },
    Answer {
        answer: SessionDescription,
        sender_id: String,
    },
    IceCandidate {
        candidate: Option<IceCandidate>,
        sender_id: String,
    },
    /// The server does not always say which peer left
    PeerLeft {
        peer_id: Option<String>,
    },
    PeerDisconnected {
        peer_id: String,
    },
    ExistingPeers(Vec<String>),
    RoomError {
        message: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerRefPayload {
    peer_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PeerRef {
    Id(String),
    Object(PeerRefPayload),
}

impl PeerRef {
    fn into_id(self) -> String {
        match self {
            PeerRef::Id(id) => id,
            PeerRef::Object(p) => p.peer_id,
        }
    }
}

#[derive(Deserialize)]
struct RoomErrorPayload {
    message: String,
}

impl InboundMessage {
    /// Decode one text frame
    ///
    /// Unknown events and payloads that do not match their event are
    /// reported as [`Error::ProtocolError`].
    pub fn parse(frame: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(frame)
            .map_err(|e| Error::ProtocolError(format!("Invalid frame: {}", e)))?;
        let event = envelope.event.as_str();
        let data = envelope.data;

        let message = match event {
            events::PEER_JOINED => InboundMessage::PeerJoined {
                peer_id: decode::<PeerRef>(event, data)?.into_id(),
            },
            events::OFFER => {
                let payload: OfferPayload = decode(event, data)?;
                InboundMessage::Offer {
                    offer: payload.offer,
                    sender_id: require_sender(event, payload.sender_id)?,
                }
            }
            events::ANSWER => {
                let payload: AnswerPayload = decode(event, data)?;
                InboundMessage::Answer {
                    answer: payload.answer,
                    sender_id: require_sender(event, payload.sender_id)?,
                }
            }
            events::ICE_CANDIDATE => {
                let payload: CandidatePayload = decode(event, data)?;
                InboundMessage::IceCandidate {
                    candidate: payload.candidate,
                    sender_id: require_sender(event, payload.sender_id)?,
                }
            }
            events::PEER_LEFT => InboundMessage::PeerLeft {
                peer_id: match data {
                    Value::Null => None,
                    other => decode::<PeerRef>(event, other).ok().map(PeerRef::into_id),
                },
            },
            events::PEER_DISCONNECTED => InboundMessage::PeerDisconnected {
                peer_id: decode::<PeerRef>(event, data)?.into_id(),
            },
            events::EXISTING_PEERS => InboundMessage::ExistingPeers(
                decode::<Vec<PeerRef>>(event, data)?
                    .into_iter()
                    .map(PeerRef::into_id)
                    .collect(),
            ),
            events::ROOM_ERROR => InboundMessage::RoomError {
                message: match data {
                    Value::String(message) => message,
                    other => decode::<RoomErrorPayload>(event, other)?.message,
                },
            },
            other => {
                return Err(Error::ProtocolError(format!("Unknown event '{}'", other)));
            }
        };
        Ok(message)
    }

    pub fn event(&self) -> &'static str {
        match self {
            InboundMessage::PeerJoined { .. } => events::PEER_JOINED,
            InboundMessage::Offer { .. } => events::OFFER,
            InboundMessage::Answer { .. } => events::ANSWER,
            InboundMessage::IceCandidate { .. } => events::ICE_CANDIDATE,
            InboundMessage::PeerLeft { .. } => events::PEER_LEFT,
            InboundMessage::PeerDisconnected { .. } => events::PEER_DISCONNECTED,
            InboundMessage::ExistingPeers(_) => events::EXISTING_PEERS,
            InboundMessage::RoomError { .. } => events::ROOM_ERROR,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::ProtocolError(format!("Malformed '{}' payload: {}", event, e)))
}

fn require_sender(event: &str, sender_id: Option<String>) -> Result<String> {
    sender_id.ok_or_else(|| Error::ProtocolError(format!("'{}' without senderId", event)))
}
