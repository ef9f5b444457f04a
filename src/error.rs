//! Harness error types.
//!
//! Every failure the harness can hit is one of a small set of kinds, and
//! each kind has a fixed policy:
//!
//! | Kind                  | Policy                         |
//! |-----------------------|--------------------------------|
//! | `Config`/`InvalidEnv` | fatal before any agent starts  |
//! | `AgentConstruction`   | fatal, aborts the launch       |
//! | `AgentRun`            | fatal to the whole process     |
//! | `Server` (profiling)  | logged, never propagated       |
//!
//! The connection-level variants (`Connection`, `Protocol`,
//! `Unauthorized`) are produced inside the built-in WebSocket agent. Only
//! `Unauthorized` escapes its run loop; the others trigger a reconnect.

use thiserror::Error;

/// Load harness errors.
#[derive(Error, Debug)]
pub enum LoaditError {
    /// Invalid run configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        /// Environment variable name.
        key: String,
        /// Raw value found in the environment.
        value: String,
        /// Parser failure description.
        reason: String,
    },

    /// The agent factory rejected a configuration.
    #[error("Failed to construct agent {name}: {reason}")]
    AgentConstruction {
        /// Name of the agent being constructed.
        name: String,
        /// Rejection reason.
        reason: String,
    },

    /// An agent run loop returned an unrecoverable error.
    #[error("Agent {name} failed: {reason}")]
    AgentRun {
        /// Name of the failed agent.
        name: String,
        /// Failure description.
        reason: String,
    },

    /// Could not reach or keep a connection to a backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend violated the agent protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend refused the agent credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Listener-side error (profiling endpoint).
    #[error("Server error: {0}")]
    Server(String),

    /// Metrics exporter could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// An agent run loop panicked.
    #[error("Agent panicked: {0}")]
    Panic(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, LoaditError>;

impl From<tokio_tungstenite::tungstenite::Error> for LoaditError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response)
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                LoaditError::Unauthorized(format!(
                    "backend answered {}",
                    response.status()
                ))
            },
            WsError::Protocol(e) => LoaditError::Protocol(e.to_string()),
            other => LoaditError::Connection(other.to_string()),
        }
    }
}

impl From<metrics_exporter_prometheus::BuildError> for LoaditError {
    fn from(err: metrics_exporter_prometheus::BuildError) -> Self {
        LoaditError::Metrics(err.to_string())
    }
}

impl LoaditError {
    /// Whether the error ends an agent's run loop instead of causing a
    /// reconnect.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            LoaditError::Unauthorized(_) | LoaditError::Config(_) | LoaditError::Panic(_)
        )
    }
}
