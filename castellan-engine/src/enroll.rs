//! Node agent enrollment and remote process control.
//!
//! Enrollment registers a domain with a host-local node agent through the
//! admin console, then authenticates to the agent and delegates process
//! control to it. The phase ordering (enroll, connect, start/kill) is
//! enforced by the core phase table; the start-enroll-shutdown sequencing
//! around the admin server belongs to the orchestrator workflow.

use std::sync::Arc;
use std::time::Duration;

use castellan_admin::{ops, AdminClient, AdminError, AgentError, NodeAgentClient};
use castellan_core::enrollment::{
    EnrollOutcome, EnrollmentPhase, EnrollmentRecord, EnrollmentState, IllegalEnrollmentTransition,
};
use castellan_core::Credentials;
use serde_json::json;

/// Errors from the enrollment protocol.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EnrollmentError {
    /// A handshake operation was attempted out of order.
    #[error(transparent)]
    Transition(#[from] IllegalEnrollmentTransition),

    /// The admin console rejected or failed the enroll operation.
    #[error("enroll operation failed: {0}")]
    Admin(#[source] AdminError),

    /// The node agent rejected credentials, was unreachable, or failed an
    /// operation. Authentication and unreachability stay distinct inside
    /// [`AgentError`]; only the latter is retryable.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl EnrollmentError {
    /// Whether the workflow layer may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Agent(err) => err.is_retryable(),
            Self::Admin(err) => err.is_retryable(),
            Self::Transition(_) => false,
        }
    }
}

/// Drives the enrollment handshake for one server under one node agent.
pub struct EnrollmentProtocol<A: AdminClient, N: NodeAgentClient> {
    admin: Arc<A>,
    agent: Arc<N>,
    state: EnrollmentState,
    session: Option<N::Session>,
    operation_timeout: Duration,
}

impl<A: AdminClient, N: NodeAgentClient> EnrollmentProtocol<A, N> {
    pub fn new(admin: Arc<A>, agent: Arc<N>) -> Self {
        Self {
            admin,
            agent,
            state: EnrollmentState::new(),
            session: None,
            operation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.state.phase()
    }

    pub fn record(&self) -> Option<&EnrollmentRecord> {
        self.state.record()
    }

    /// Register `record` with the node agent through the admin console.
    ///
    /// Requires a live admin connection. Idempotent: re-enrolling with an
    /// identical record is a no-op reported as `AlreadyEnrolled`; a
    /// conflicting record is rejected without touching the stored one.
    pub async fn enroll(
        &mut self,
        connection: &mut A::Connection,
        record: EnrollmentRecord,
    ) -> Result<EnrollOutcome, EnrollmentError> {
        let mut next = self.state.clone();
        let outcome = next.enroll(record.clone())?;

        match outcome {
            EnrollOutcome::Enrolled => {
                let args = json!({
                    "domain_directory": record.domain_directory,
                    "node_agent_home": record.node_agent_home,
                });
                self.admin
                    .invoke(connection, ops::ENROLL, args, self.operation_timeout)
                    .await
                    .map_err(EnrollmentError::Admin)?;
                tracing::info!(
                    server = %record.server_name,
                    agent = %record.node_agent_address,
                    "enrolled server under node agent"
                );
            }
            EnrollOutcome::AlreadyEnrolled => {
                tracing::debug!(server = %record.server_name, "server already enrolled");
            }
        }

        self.state = next;
        Ok(outcome)
    }

    /// Authenticate to the node agent. Only legal once enrolled.
    pub async fn connect_agent(
        &mut self,
        credentials: &Credentials,
        domain_name: &str,
        timeout: Duration,
    ) -> Result<(), EnrollmentError> {
        let mut next = self.state.clone();
        next.connected()?;
        let record = self
            .state
            .record()
            .cloned()
            .ok_or(IllegalEnrollmentTransition::Phase {
                from: self.state.phase(),
                operation: "connect",
            })?;

        let session = self
            .agent
            .connect(
                credentials,
                &record.node_agent_address,
                record.node_agent_port,
                domain_name,
                &record.domain_directory,
                timeout,
            )
            .await?;

        tracing::info!(
            agent = %record.node_agent_address,
            port = record.node_agent_port,
            "connected to node agent"
        );
        self.session = Some(session);
        self.state = next;
        Ok(())
    }

    /// Start the enrolled server under agent control.
    pub async fn start_under_agent(&mut self) -> Result<(), EnrollmentError> {
        let mut next = self.state.clone();
        next.server_started()?;
        let record = self.required_record("start")?;
        let session = self.session.as_mut().ok_or(IllegalEnrollmentTransition::Phase {
            from: next.phase(),
            operation: "start",
        })?;

        self.agent
            .start_server(session, &record.server_name, &record.domain_directory)
            .await?;

        tracing::info!(server = %record.server_name, "started server under node agent");
        self.state = next;
        Ok(())
    }

    /// Kill the agent-managed server.
    ///
    /// This is an unconditional forced termination, not a graceful
    /// shutdown: the process dies without running shutdown hooks. The agent
    /// session survives.
    pub async fn kill_under_agent(&mut self) -> Result<(), EnrollmentError> {
        let mut next = self.state.clone();
        next.server_killed()?;
        let record = self.required_record("kill")?;
        let session = self.session.as_mut().ok_or(IllegalEnrollmentTransition::Phase {
            from: next.phase(),
            operation: "kill",
        })?;

        self.agent.kill_server(session, &record.server_name).await?;

        tracing::info!(server = %record.server_name, "killed server under node agent");
        self.state = next;
        Ok(())
    }

    /// Close the agent session. Only legal while connected with no managed
    /// server running.
    pub async fn disconnect_agent(&mut self) -> Result<(), EnrollmentError> {
        let mut next = self.state.clone();
        next.disconnected()?;
        if let Some(session) = self.session.take() {
            self.agent.disconnect(session).await;
        }
        self.state = next;
        Ok(())
    }

    fn required_record(
        &self,
        operation: &'static str,
    ) -> Result<EnrollmentRecord, IllegalEnrollmentTransition> {
        self.state
            .record()
            .cloned()
            .ok_or(IllegalEnrollmentTransition::Phase {
                from: self.state.phase(),
                operation,
            })
    }
}
