//! Transport error taxonomy.
//!
//! Every failure is a typed value; nothing is swallowed. The retryability
//! split encodes the workflow policy: timeouts and an unreachable agent may
//! be retried, everything else is fatal on first occurrence.

use std::time::Duration;

/// Errors from the administration console transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AdminError {
    /// Connecting or authenticating to the endpoint failed.
    #[error("connection to administration endpoint failed: {0}")]
    Connection(String),

    /// The call did not complete within the caller-supplied timeout.
    #[error("operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// The endpoint executed the operation and reported failure.
    #[error("remote operation '{operation}' failed: {message}")]
    Remote { operation: String, message: String },

    /// Another edit session already holds the domain lock.
    ///
    /// Surfaced to the caller rather than retried: blind retry can deadlock
    /// two workflows against each other.
    #[error("edit lock is held{}", owner.as_deref().map(|o| format!(" by {o}")).unwrap_or_default())]
    LockHeld { owner: Option<String> },
}

impl AdminError {
    /// Whether the workflow layer may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors from the node agent endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AgentError {
    /// The agent rejected the presented credentials.
    #[error("node agent rejected credentials")]
    Authentication,

    /// The agent endpoint could not be reached.
    #[error("node agent at {address}:{port} is unreachable: {message}")]
    Unreachable {
        address: String,
        port: u16,
        message: String,
    },

    /// The agent executed the operation and reported failure.
    #[error("node agent operation '{operation}' failed: {message}")]
    Operation { operation: String, message: String },
}

impl AgentError {
    /// Whether the workflow layer may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}
