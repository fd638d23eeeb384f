//! Local and remote media streams
//!
//! The local stream is acquired once per call through a [`MediaSource`] and
//! attached to every peer connection the call creates. Remote streams are
//! assembled from the tracks a peer connection reports.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Which local devices a call captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Capture a microphone track (default: true)
    pub audio: bool,
    /// Capture a camera track (default: true)
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Reasons local media acquisition can be refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaAccessError {
    /// The user or the OS refused access
    #[error("permission to capture media was denied")]
    PermissionDenied,

    /// No device of the requested kind exists
    #[error("no {0} device found")]
    DeviceNotFound(MediaKind),

    /// The device exists but another application holds it
    #[error("{0} device is already in use")]
    DeviceBusy(MediaKind),

    /// The device cannot satisfy the requested constraints
    #[error("constraints cannot be satisfied: {0}")]
    Unsupported(String),

    /// Neither audio nor video was requested
    #[error("no audio or video was requested")]
    NothingRequested,
}

impl MediaAccessError {
    /// Message suitable for showing to the person joining the call
    pub fn user_message(&self) -> String {
        match self {
            MediaAccessError::PermissionDenied => {
                "Camera and microphone access was denied. Allow access and join again.".to_string()
            }
            MediaAccessError::DeviceNotFound(MediaKind::Video) => {
                "No camera was found. Connect a camera and join again.".to_string()
            }
            MediaAccessError::DeviceNotFound(MediaKind::Audio) => {
                "No microphone was found. Connect a microphone and join again.".to_string()
            }
            MediaAccessError::DeviceBusy(kind) => format!(
                "The {} device is being used by another application.",
                kind
            ),
            MediaAccessError::Unsupported(detail) => {
                format!("Your device does not support the requested media: {}", detail)
            }
            MediaAccessError::NothingRequested => {
                "The call was configured without audio or video.".to_string()
            }
        }
    }
}

/// One captured local track
///
/// Clones share the stopped flag, so stopping any clone stops the track.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    sample_track: Option<Arc<TrackLocalStaticSample>>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Track that is not backed by an RTP sample track
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            sample_track: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Track backed by a sample track that can be added to a peer connection
    pub fn with_sample_track(kind: MediaKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: track.id().to_string(),
            kind,
            sample_track: Some(track),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn sample_track(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        self.sample_track.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped local {} track {}", self.kind, self.id);
        }
    }

    /// Write one encoded sample to the track
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::MediaTrackError(format!("track {} is stopped", self.id)));
        }
        let track = self.sample_track.as_ref().ok_or_else(|| {
            Error::MediaTrackError(format!("track {} has no sample sink", self.id))
        })?;
        track
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("rtp", &self.sample_track.is_some())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// The local camera/microphone stream of a call
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Stop every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }
}

/// One track received from the remote peer
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    kind: MediaKind,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            track: None,
        }
    }

    pub fn from_webrtc(track: Arc<TrackRemote>, kind: MediaKind) -> Self {
        Self {
            id: track.id(),
            kind,
            track: Some(track),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Underlying RTP track, for reading packets
    pub fn rtp_track(&self) -> Option<&Arc<TrackRemote>> {
        self.track.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Stream published to observers when remote tracks arrive
#[derive(Debug, Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Add `track`, replacing a previous track with the same id
    pub fn add_track(&mut self, track: RemoteTrack) {
        self.tracks.retain(|t| t.id() != track.id());
        self.tracks.push(track);
    }
}

impl PartialEq for RemoteStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.tracks.len() == other.tracks.len()
            && self
                .tracks
                .iter()
                .zip(other.tracks.iter())
                .all(|(a, b)| a.id == b.id && a.kind == b.kind)
    }
}

/// Provider of local camera/microphone media
///
/// `acquire` is the only suspending step of a join; it may wait for a
/// permission prompt and may be refused.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<LocalStream, MediaAccessError>;
}

/// Media source producing Opus/VP8 sample tracks
///
/// The application writes encoded samples into the returned tracks with
/// [`LocalTrack::write_sample`].
#[derive(Debug, Default)]
pub struct TrackMediaSource;

impl TrackMediaSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaSource for TrackMediaSource {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<LocalStream, MediaAccessError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaAccessError::NothingRequested);
        }

        let stream_id = format!("local-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();

        if constraints.audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                format!("audio-{}", uuid::Uuid::new_v4()),
                stream_id.clone(),
            ));
            tracks.push(LocalTrack::with_sample_track(MediaKind::Audio, track));
        }

        if constraints.video {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                format!("video-{}", uuid::Uuid::new_v4()),
                stream_id.clone(),
            ));
            tracks.push(LocalTrack::with_sample_track(MediaKind::Video, track));
        }

        info!(
            "Acquired local stream {} with {} track(s)",
            stream_id,
            tracks.len()
        );
        Ok(LocalStream::new(stream_id, tracks))
    }
}
