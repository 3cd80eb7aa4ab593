use serde_json::Value;
use thiserror::Error;

/// Main error type for hubsockets
///
/// Errors are `Clone` because a single failure is delivered to every
/// observer registered on a [`Promise`](crate::core::promise::Promise).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubSocketError {
    /// Server answered negotiate with a protocol version we don't speak
    #[error("Protocol mismatch: client speaks {expected}, server answered {actual}")]
    ProtocolMismatch { expected: String, actual: String },

    /// Operation not permitted in the current connection state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Negotiate/connect/send/ping/abort I/O failure
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Heartbeat timeout exceeded or connection torn down under a pending call
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Remote hub method threw
    #[error("Hub invocation failed: {message}")]
    HubInvocation {
        message: String,
        data: Option<Value>,
        stack_trace: Option<String>,
        is_hub_exception: bool,
    },

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Ping answered with something other than "pong"
    #[error("Ping failed: {0}")]
    Ping(String),

    /// A continuation closure panicked
    #[error("Callback panicked: {0}")]
    CallbackPanicked(String),

    /// A continuation failed while handling an earlier failure
    #[error("{error} (suppressed: {suppressed})")]
    Suppressed {
        error: Box<HubSocketError>,
        suppressed: Box<HubSocketError>,
    },

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

impl HubSocketError {
    /// Attach `cause` as the nested failure this error replaced
    pub fn with_suppressed(self, cause: HubSocketError) -> Self {
        HubSocketError::Suppressed {
            error: Box::new(self),
            suppressed: Box::new(cause),
        }
    }

    /// The failure this error replaced, if any
    pub fn suppressed(&self) -> Option<&HubSocketError> {
        match self {
            HubSocketError::Suppressed { suppressed, .. } => Some(suppressed),
            _ => None,
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, HubSocketError::InvalidState(_))
    }

    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, HubSocketError::ProtocolMismatch { .. })
    }
}

impl From<serde_json::Error> for HubSocketError {
    fn from(e: serde_json::Error) -> Self {
        HubSocketError::Serialization(e.to_string())
    }
}

/// Result type for hubsockets operations
pub type Result<T> = std::result::Result<T, HubSocketError>;
