use thiserror::Error;

/// Failure to obtain local media; fatal to the call attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAcquisitionError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("no matching capture device")]
    DeviceNotFound,
    #[error("capture device busy")]
    DeviceBusy,
    #[error("media acquisition failed: {0}")]
    Unknown(String),
}

impl MediaAcquisitionError {
    /// Message shown to the user when the call cannot start.
    pub fn user_message(&self) -> &'static str {
        match self {
            MediaAcquisitionError::PermissionDenied => {
                "Permission denied. Please allow access to your camera and microphone."
            }
            MediaAcquisitionError::DeviceNotFound => {
                "No camera or microphone found. Please connect a device and try again."
            }
            MediaAcquisitionError::DeviceBusy => {
                "Camera or microphone is already in use by another application."
            }
            MediaAcquisitionError::Unknown(_) => "Failed to access camera or microphone",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("peer connection not initialized")]
    NotInitialized,
    #[error("malformed remote description: {0}")]
    MalformedRemoteDescription(String),
    #[error("malformed ice candidate: {0}")]
    MalformedCandidate(String),
    #[error("peer session already cleaned up")]
    SessionClosed,
    #[error("native peer connection error: {0}")]
    Native(String),
}

/// Relay request failure; the next poll is the retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),
    #[error("relay request timed out")]
    RelayTimeout,
    #[error("relay rejected request with status {status}")]
    Rejected { status: u16 },
    #[error("relay response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Media(#[from] MediaAcquisitionError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("a call attempt is already open")]
    AlreadyOpen,
    #[error("no call attempt is open")]
    NotOpen,
}

impl CallError {
    pub fn user_message(&self) -> String {
        match self {
            CallError::Media(err) => err.user_message().to_string(),
            CallError::Negotiation(NegotiationError::MalformedRemoteDescription(_)) => {
                "Failed to answer call".to_string()
            }
            CallError::Negotiation(_) => "Failed to establish connection".to_string(),
            CallError::Transport(_) => "Could not reach the call relay".to_string(),
            CallError::AlreadyOpen | CallError::NotOpen => self.to_string(),
        }
    }
}
