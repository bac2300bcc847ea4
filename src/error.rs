use thiserror::Error;

use crate::media::MediaError;

/// Error types for the live classroom session core
#[derive(Debug, Error)]
pub enum LiveError {
    /// Media capture errors
    #[error("Local media error: {0}")]
    Media(#[from] MediaError),

    /// Peer connection errors
    #[error("Failed to create peer connection: {0}")]
    PeerConnectionCreation(String),

    #[error("Failed to create offer: {0}")]
    CreateOfferFailed(String),

    #[error("Failed to create answer: {0}")]
    CreateAnswerFailed(String),

    #[error("Invalid SDP format: {0}")]
    InvalidSdp(String),

    #[error("Failed to set remote description: {0}")]
    SetRemoteDescriptionFailed(String),

    #[error("Failed to add ICE candidate: {0}")]
    AddIceCandidateFailed(String),

    #[error("Failed to replace track: {0}")]
    ReplaceTrackFailed(String),

    #[error("Peer link {0} not found")]
    PeerLinkNotFound(String),

    /// Room and participant errors
    #[error("No open room for lesson {0}")]
    RoomNotFound(String),

    #[error("Room {0} has ended")]
    RoomEnded(String),

    #[error("Room {0} is locked")]
    RoomLocked(String),

    #[error("Participant {0} not found")]
    ParticipantNotFound(String),

    #[error("Participant {0} not authorized for this operation")]
    Unauthorized(String),

    #[error("Invalid room transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session is not joined")]
    NotJoined,

    /// Durable store errors
    #[error("Record store error: {0}")]
    Store(String),

    /// Signaling errors
    #[error("Failed to open signaling channel: {0}")]
    ChannelUnavailable(String),

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("Invalid signaling message: {0}")]
    InvalidSignalingMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebRTC API errors
    #[error("WebRTC API error: {0}")]
    WebRtcApi(String),

    #[error("Failed to register codec: {0}")]
    CodecRegistrationFailed(String),

    /// Network errors
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using LiveError
pub type Result<T> = std::result::Result<T, LiveError>;

/// How a failure affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Degrade and carry on (no camera, retry negotiation, wait for reconciliation).
    Recoverable,
    /// Surface a notice; the user may retry.
    Reported,
    /// The session cannot proceed; route the user out of the room.
    Fatal,
}

impl LiveError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        LiveError::Internal(msg.into())
    }

    /// Helper to create WebRTC API errors
    pub fn webrtc_api(msg: impl Into<String>) -> Self {
        LiveError::WebRtcApi(msg.into())
    }

    /// Helper to create store errors
    pub fn store(msg: impl Into<String>) -> Self {
        LiveError::Store(msg.into())
    }

    pub fn severity(&self) -> Severity {
        match self {
            LiveError::Media(_)
            | LiveError::CreateOfferFailed(_)
            | LiveError::CreateAnswerFailed(_)
            | LiveError::InvalidSdp(_)
            | LiveError::SetRemoteDescriptionFailed(_)
            | LiveError::AddIceCandidateFailed(_)
            | LiveError::ReplaceTrackFailed(_)
            | LiveError::PeerLinkNotFound(_)
            | LiveError::PeerConnectionCreation(_)
            | LiveError::InvalidSignalingMessage(_)
            | LiveError::WebRtcApi(_) => Severity::Recoverable,

            LiveError::ChannelUnavailable(_)
            | LiveError::ChannelClosed
            | LiveError::RoomEnded(_) => Severity::Fatal,

            _ => Severity::Reported,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Convert webrtc::Error to LiveError
impl From<webrtc::Error> for LiveError {
    fn from(err: webrtc::Error) -> Self {
        LiveError::WebRtcApi(err.to_string())
    }
}

impl From<reqwest::Error> for LiveError {
    fn from(err: reqwest::Error) -> Self {
        LiveError::Store(err.to_string())
    }
}
