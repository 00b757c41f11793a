use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket could not be opened (DNS, TLS, refused, HTTP upgrade)
    #[error("Could not connect: {0}")]
    Connect(String),

    /// Connected, but the session was never acknowledged (bad key, bad
    /// model, timeout)
    #[error("Session setup failed: {0}")]
    Setup(String),

    /// An established session broke
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// True when the session never became usable, as opposed to dropping
    /// after it was open
    pub fn is_establishment(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Setup(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
