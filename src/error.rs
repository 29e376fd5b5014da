//! Relay-wide error taxonomy.
//!
//! Every runtime error the crate produces is one of these variants. Init-time
//! configuration errors (`Config`, `DuplicateServer`) are fatal and handled
//! by aborting the process in `main`; self-referential servers are instead
//! filtered out with a warning during config load (see `config.rs`).
//! Everything else is
//! recovered locally by the component that observed it (see `spec.md` §7).

use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate server name: {0}")]
    DuplicateServer(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("transport error on '{server}': {detail}")]
    Transport { server: String, detail: String },

    #[error("failed to connect to '{server}': {detail}")]
    ConnectionFailed { server: String, detail: String },

    #[error("request to '{server}' timed out after {millis}ms")]
    Timeout { server: String, millis: u64 },

    #[error("failed to parse message from '{server}': {detail}")]
    ParseFailure { server: String, detail: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("server not connected: {0}")]
    ServerNotConnected(String),

    #[error("SECURITY: reference conflict for '{name}': {detail}")]
    ReferenceConflict { name: String, detail: String },

    #[error("SECURITY: stale reference rejected: {0}")]
    StaleReference(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("circuit open for '{0}', rejecting without attempt")]
    CircuitOpen(String),

    #[error("routing error: {0}")]
    Routing(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl RelayError {
    /// Whether a connect-level failure carrying this error should count
    /// toward the supervisor's retry budget (vs. being a permanent
    /// misconfiguration that retrying cannot fix).
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RelayError::Config(_)
                | RelayError::DuplicateServer(_)
                | RelayError::UnknownServer(_)
                | RelayError::InvalidArguments(_)
        )
    }
}
