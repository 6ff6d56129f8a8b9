/*!
 * Error types for the hubbridge engine crate.
 */
use thiserror::Error;

/// Failure of one request to the hub
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not finish in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The hub could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The hub answered with a non-success status
    #[error("Hub answered {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The hub answered with something the bridge cannot read
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The endpoint is short-circuited after repeated failures
    #[error("Endpoint {0} is short-circuited")]
    CircuitOpen(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed
    ///
    /// Client errors other than 429 are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connection(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::InvalidResponse(_)
            | TransportError::InvalidRequest(_)
            | TransportError::CircuitOpen(_) => false,
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        TransportError::Timeout(msg.as_ref().to_string())
    }

    /// Create a new connection error
    pub fn connection<S: AsRef<str>>(msg: S) -> Self {
        TransportError::Connection(msg.as_ref().to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::InvalidRequest(err.to_string())
    }
}

/// Result type for hub requests
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Error type for hubbridge engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Hub request error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] hubbridge_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] hubbridge_core::error::Error),

    /// Inbound request authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for hubbridge engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new authentication error
    pub fn authentication<S: AsRef<str>>(msg: S) -> Self {
        Error::Authentication(msg.as_ref().to_string())
    }

    /// Create a new validation error
    pub fn validation<S: AsRef<str>>(msg: S) -> Self {
        Error::Validation(msg.as_ref().to_string())
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::Timeout(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
