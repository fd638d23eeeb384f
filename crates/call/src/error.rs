//! Error types for the call client

use crate::media::MediaAccessError;

/// Result type alias using the call client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in call client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Room identifier or meeting link could not be understood
    #[error("Invalid room: {0}")]
    InvalidRoom(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Signaling frame that does not match the wire contract
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Local media could not be acquired
    #[error("Media access error: {0}")]
    MediaAccess(#[from] MediaAccessError),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Room API returned an unexpected response
    #[error("Room API error: {0}")]
    RoomApiError(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The call was ended while a join was still in progress
    #[error("Call ended before the join completed")]
    CallEnded,

    /// The session actor has stopped
    #[error("Session closed")]
    SessionClosed,

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl Error {
    /// Check if this error is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::WebSocketError(_)
                | Error::IoError(_)
                | Error::Http(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::InvalidRoom(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_) | Error::IceCandidateError(_) | Error::SdpError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SignalingError("test".to_string()).is_retryable());
        assert!(Error::WebSocketError("test".to_string()).is_retryable());
        assert!(!Error::InvalidConfig("test".to_string()).is_retryable());
        assert!(!Error::CallEnded.is_retryable());
    }

    #[test]
    fn test_error_is_config_error() {
        assert!(Error::InvalidConfig("test".to_string()).is_config_error());
        assert!(Error::InvalidRoom("".to_string()).is_config_error());
        assert!(!Error::SignalingError("test".to_string()).is_config_error());
    }

    #[test]
    fn test_error_is_peer_error() {
        assert!(Error::SdpError("test".to_string()).is_peer_error());
        assert!(Error::IceCandidateError("test".to_string()).is_peer_error());
        assert!(!Error::RoomApiError("test".to_string()).is_peer_error());
    }

    #[test]
    fn test_media_error_conversion() {
        let err = Error::from(MediaAccessError::PermissionDenied);
        assert!(matches!(err, Error::MediaAccess(MediaAccessError::PermissionDenied)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
