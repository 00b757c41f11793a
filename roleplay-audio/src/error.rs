//! Error types for audio capture and playback

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AudioError>;

#[derive(Error, Debug)]
pub enum AudioError {
    /// The OS refused microphone access. Kept apart from every other device
    /// failure so callers can tell the user to grant access.
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resampling error: {0}")]
    ResampleError(String),

    #[error("Invalid audio payload: {0}")]
    InvalidPayload(String),

    #[error("Output device closed")]
    OutputClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AudioError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Self::StreamError(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True when the failure is an access refusal rather than a missing or broken device
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}
