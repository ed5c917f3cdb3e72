use thiserror::Error;

/// Errors produced by the bridge protocol layer.
#[derive(Debug, Error)]
pub enum VzError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("malformed payload: expected {expected}, got {found}")]
    MalformedPayload { expected: String, found: String },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VzError {
    /// Whether this error must tear the session down.
    ///
    /// Message-local errors (a single bad payload) are dropped by the relays;
    /// everything touching the stream or bus plumbing is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VzError::Codec(_) | VzError::MalformedPayload { .. } | VzError::InvalidMessage(_)
        )
    }
}

impl From<ciborium::de::Error<std::io::Error>> for VzError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        VzError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for VzError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        VzError::Codec(e.to_string())
    }
}

pub type VzResult<T> = Result<T, VzError>;
