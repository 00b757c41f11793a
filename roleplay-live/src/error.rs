//! User-facing failures of a live session

use roleplay_audio::AudioError;
use roleplay_transport::TransportError;
use thiserror::Error;

/// Every way a session can fail, with the message shown to the user.
///
/// Only [`LiveError::MicrophonePermissionDenied`] talks about permission,
/// so callers can key remediation text off the message alone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiveError {
    #[error("No API key configured. Set GEMINI_API_KEY or add api_key to the config file")]
    MissingApiKey,

    #[error("No audio input API is available on this system")]
    MicrophoneApiUnavailable,

    #[error("Refusing to use an unencrypted connection to {0}")]
    InsecureEndpoint(String),

    #[error("Microphone permission denied. Allow microphone access for this application and try again ({0})")]
    MicrophonePermissionDenied(String),

    #[error("No usable microphone found: {0}")]
    MicrophoneUnavailable(String),

    #[error("Could not start audio output: {0}")]
    AudioOutput(String),

    #[error("Could not establish a connection to the conversation service: {0}")]
    ConnectFailed(String),

    #[error("Lost connection to the conversation service: {0}")]
    ConnectionLost(String),

    #[error("The live client has shut down")]
    ClientClosed,
}

impl LiveError {
    /// Classify a microphone acquisition failure
    pub fn from_microphone(err: AudioError) -> Self {
        match err {
            AudioError::PermissionDenied(detail) => Self::MicrophonePermissionDenied(detail),
            other => Self::MicrophoneUnavailable(other.to_string()),
        }
    }

    pub fn from_output(err: AudioError) -> Self {
        Self::AudioOutput(err.to_string())
    }

    /// Classify a transport failure: never established vs. dropped later.
    /// Only the detail is kept; the variant supplies the category.
    pub fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionLost(detail) => Self::ConnectionLost(detail),
            TransportError::Connect(detail) | TransportError::Setup(detail) => {
                Self::ConnectFailed(detail)
            }
            other => Self::ConnectFailed(other.to_string()),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::MicrophonePermissionDenied(_))
    }

    /// Failed before any device was touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingApiKey | Self::MicrophoneApiUnavailable | Self::InsecureEndpoint(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;
