//! Error types for the sandtable daemons

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Sandtable error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No driver registered under the configured name
    #[error("Unknown machine driver: {0}")]
    UnknownDriver(String),

    /// Driver construction or physical command failure
    #[error("Driver error: {0}")]
    Driver(String),

    /// Listener could not be bound after bounded retries
    #[error("Failed to bind {addr} after {attempts} attempts")]
    Bind {
        /// Address the listener tried to bind
        addr: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Malformed frame, unknown command, or protocol version mismatch
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Wire or file serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pattern generator failed to produce a drawing
    #[error("Generation failed: {0}")]
    Generation(String),

    /// No pattern generator registered
    #[error("Pattern registry is empty")]
    EmptyRegistry,

    /// Drawing never reported ready within the wait timeout
    #[error("Timed out waiting for drawing to finish")]
    DrawTimeout,

    /// Job id not present in the store
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
