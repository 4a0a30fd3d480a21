//! Node agent endpoint contract.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use castellan_core::Credentials;

use crate::error::AgentError;

/// Client contract for a host-local node agent: a service capable of
/// starting and stopping enrolled server processes under external
/// credential control.
#[async_trait]
pub trait NodeAgentClient: Send + Sync {
    /// Authenticated session with one agent.
    type Session: Send;

    /// Authenticate to the agent for a specific domain.
    ///
    /// Fails with [`AgentError::Authentication`] on bad credentials and
    /// [`AgentError::Unreachable`] on network failure; the two are distinct
    /// because only the latter is retryable.
    async fn connect(
        &self,
        credentials: &Credentials,
        address: &str,
        port: u16,
        domain_name: &str,
        domain_directory: &Path,
        timeout: Duration,
    ) -> Result<Self::Session, AgentError>;

    /// Start an enrolled server under agent control.
    async fn start_server(
        &self,
        session: &mut Self::Session,
        server_name: &str,
        domain_directory: &Path,
    ) -> Result<(), AgentError>;

    /// Kill an agent-managed server.
    ///
    /// This is an unconditional forced termination, not a graceful
    /// shutdown: the process is killed without running shutdown hooks.
    async fn kill_server(
        &self,
        session: &mut Self::Session,
        server_name: &str,
    ) -> Result<(), AgentError>;

    /// Release the agent session. Best-effort; errors are not surfaced.
    async fn disconnect(&self, session: Self::Session);
}
