//! Error types for the sandbox runtime.

use thiserror::Error;

/// Result type alias using the runtime's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by the driver, runtime, and API crates.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Driver errors (§4.1)
    // =========================================================================
    #[error("image fetch failed: {0}")]
    ImageFetch(String),

    #[error("container create failed: {0}")]
    ContainerCreate(String),

    #[error("container start failed: {0}")]
    ContainerStart(String),

    #[error("container inspect failed: {0}")]
    ContainerInspect(String),

    #[error("container stop failed: {0}")]
    ContainerStop(String),

    #[error("container remove failed: {0}")]
    ContainerRemove(String),

    #[error("no usable network address found for container")]
    NoAddress,

    #[error("driver operation timed out: {0}")]
    Timeout(String),

    // =========================================================================
    // Registry / Manager errors (§4.2, §4.3)
    // =========================================================================
    #[error("sandbox already exists: {0}")]
    AlreadyExists(String),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Dispatcher / Hub errors (§4.4, §4.5)
    // =========================================================================
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("agent transport error: {0}")]
    AgentTransport(String),

    #[error("observation parse error: {0}")]
    ObservationParse(String),

    // =========================================================================
    // Generic
    // =========================================================================
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists(id.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error should surface to an HTTP client as 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
