//! Error handling for the camera bridge

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Port reservation retry budget spent
    #[error("No UDP ports available")]
    PortExhausted,

    /// Transcoder died before producing any output
    #[error("Transcoder failed to start: {0}")]
    ProcessStartup(String),

    /// Transcoder died after streaming began
    #[error("Transcoder exited (code {code:?}): {log}")]
    ProcessExited { code: Option<i32>, log: String },

    /// UDP bind/send failure
    #[error("Socket error: {0}")]
    Socket(String),

    /// Talkback signaling channel failure
    #[error("Talkback error: {0}")]
    Talkback(String),

    /// Session lookup failure
    #[error("Unknown session: {0}")]
    SessionNotFound(String),

    /// Session is not in the state the operation requires
    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Upstream NVR controller error
    #[error("Controller error: {0}")]
    Controller(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
