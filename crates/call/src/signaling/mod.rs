//! Signaling: wire protocol and channel to the signaling server

pub mod channel;
pub mod protocol;
pub mod websocket;

pub use channel::{ChannelEvent, ChannelEventSink, ChannelStatus, SignalingChannel};
pub use protocol::{
    IceCandidate, InboundMessage, OutboundMessage, SdpType, SessionDescription,
};
pub use websocket::WebSocketChannel;
