//! Named workflows over one administrative target.
//!
//! The orchestrator owns the target and credentials, composes the session
//! machine, lifecycle controller, enrollment protocol, and keystore
//! pipeline into workflows, and decides per failure whether to retry.
//! Retry applies only to retryable failures (transport timeouts, an
//! unreachable agent); lock contention, activation failures, authentication
//! failures, and tool failures stop the workflow on first occurrence. A
//! session opened by a workflow is always committed or abandoned before an
//! error propagates.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use castellan_admin::{AdminClient, NodeAgentClient};
use castellan_core::{CommitReceipt, Credentials, DomainTarget, EnrollmentRecord, KeystoreArtifact};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::enroll::{EnrollmentError, EnrollmentProtocol};
use crate::keystore::{KeystorePipeline, KeystoreRequest, PartialProvisioning};
use crate::lifecycle::{LifecycleError, ProcessLauncher, ServerLifecycleController};
use crate::session::{SessionError, SessionStateMachine, SessionTimeouts};

/// Timeouts applied across a workflow's suspension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowTimeouts {
    /// Budget for connecting to the admin endpoint or node agent.
    pub connect: Duration,
    /// Budget for each ordinary remote operation.
    pub operation: Duration,
    /// Budget for the blocking `activate` call.
    pub activate: Duration,
    /// Budget for a standalone server start to become reachable.
    pub server_start: Duration,
}

impl Default for WorkflowTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            operation: Duration::from_secs(30),
            activate: Duration::from_secs(120),
            server_start: Duration::from_secs(300),
        }
    }
}

/// How often a retryable failure is reattempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// One step of a configuration change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigAction {
    /// Move the navigation cursor.
    Navigate(String),
    /// Set an attribute at a path resolved against the cursor.
    Set {
        path: String,
        attribute: String,
        value: Value,
    },
}

impl ConfigAction {
    pub fn navigate(path: impl Into<String>) -> Self {
        Self::Navigate(path.into())
    }

    pub fn set(path: impl Into<String>, attribute: impl Into<String>, value: Value) -> Self {
        Self::Set {
            path: path.into(),
            attribute: attribute.into(),
            value,
        }
    }
}

/// Structured result of a completed workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow: &'static str,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Receipt of the committed transaction, when the workflow ran one.
    pub receipt: Option<CommitReceipt>,
    /// True when committed changes only take effect after a server restart.
    pub requires_restart: bool,
    /// Keystore artifacts produced, when the workflow provisioned any.
    pub artifacts: Vec<KeystoreArtifact>,
}

/// A failed workflow: the failing step name plus the underlying cause.
#[derive(Debug, thiserror::Error)]
#[error("workflow '{workflow}' failed at step '{step}': {cause}")]
pub struct WorkflowError {
    pub workflow: &'static str,
    pub step: &'static str,
    #[source]
    pub cause: WorkflowFailure,
}

/// The typed cause behind a [`WorkflowError`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorkflowFailure {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Provisioning(#[from] PartialProvisioning),
}

struct Workflow {
    name: &'static str,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl Workflow {
    fn begin(name: &'static str, target: &DomainTarget) -> Self {
        let run_id = Uuid::new_v4();
        tracing::info!(
            workflow = name,
            run_id = %run_id,
            domain = %target.domain_name,
            url = %target.admin_url(),
            "workflow started"
        );
        Self {
            name,
            run_id,
            started_at: Utc::now(),
        }
    }

    fn fail(&self, step: &'static str, cause: impl Into<WorkflowFailure>) -> WorkflowError {
        let cause = cause.into();
        tracing::error!(
            workflow = self.name,
            run_id = %self.run_id,
            step,
            error = %cause,
            "workflow failed"
        );
        WorkflowError {
            workflow: self.name,
            step,
            cause,
        }
    }

    fn finish(
        self,
        receipt: Option<CommitReceipt>,
        artifacts: Vec<KeystoreArtifact>,
    ) -> WorkflowReport {
        let requires_restart = receipt.as_ref().is_some_and(|r| r.requires_restart);
        tracing::info!(
            workflow = self.name,
            run_id = %self.run_id,
            requires_restart,
            "workflow completed"
        );
        WorkflowReport {
            workflow: self.name,
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            receipt,
            requires_restart,
            artifacts,
        }
    }
}

/// Composes the components into named workflows against one target.
///
/// One orchestrator serves one [`DomainTarget`]; independent instances may
/// operate on different targets in parallel with no shared state.
pub struct Orchestrator<A: AdminClient, N: NodeAgentClient> {
    admin: Arc<A>,
    agent: Arc<N>,
    launcher: Arc<dyn ProcessLauncher>,
    target: DomainTarget,
    admin_credentials: Credentials,
    agent_credentials: Credentials,
    timeouts: WorkflowTimeouts,
    retry: RetryPolicy,
}

impl<A: AdminClient, N: NodeAgentClient> Orchestrator<A, N> {
    pub fn new(
        admin: Arc<A>,
        agent: Arc<N>,
        launcher: Arc<dyn ProcessLauncher>,
        target: DomainTarget,
        admin_credentials: Credentials,
        agent_credentials: Credentials,
    ) -> Self {
        Self {
            admin,
            agent,
            launcher,
            target,
            admin_credentials,
            agent_credentials,
            timeouts: WorkflowTimeouts::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: WorkflowTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn target(&self) -> &DomainTarget {
        &self.target
    }

    /// Create a new domain from a template and apply initial configuration.
    ///
    /// An existing domain at the target path is replaced.
    pub async fn create_domain(
        &self,
        template: &Path,
        actions: &[ConfigAction],
    ) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("create_domain", &self.target);
        let receipt = self.offline_transaction(&wf, template, actions).await?;
        Ok(wf.finish(Some(receipt), Vec::new()))
    }

    /// Edit an existing domain offline, starting from its serialized
    /// configuration at `source`.
    pub async fn configure_domain_offline(
        &self,
        source: &Path,
        actions: &[ConfigAction],
    ) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("configure_domain_offline", &self.target);
        let receipt = self.offline_transaction(&wf, source, actions).await?;
        Ok(wf.finish(Some(receipt), Vec::new()))
    }

    /// Apply a change set in one online edit transaction against the
    /// running admin server.
    ///
    /// The report's `requires_restart` flag is set when the committed
    /// changes need a server restart; sequencing that restart is the
    /// caller's decision.
    pub async fn configure_domain_online(
        &self,
        actions: &[ConfigAction],
    ) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("configure_domain_online", &self.target);
        let receipt = self.online_transaction(&wf, actions).await?;
        Ok(wf.finish(Some(receipt), Vec::new()))
    }

    /// Start the server outside node agent control and leave it running.
    pub async fn start_server(&self) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("start_server", &self.target);
        let mut controller = self.controller();
        let connection = controller
            .start_standalone(&self.admin_credentials, self.timeouts.server_start)
            .await
            .map_err(|e| wf.fail("start_standalone", e))?;
        self.admin.disconnect(connection).await;
        Ok(wf.finish(None, Vec::new()))
    }

    /// Start the server, apply a change set online, and shut the server
    /// back down.
    pub async fn start_and_configure(
        &self,
        actions: &[ConfigAction],
    ) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("start_and_configure", &self.target);
        let mut controller = self.controller();
        let connection = controller
            .start_standalone(&self.admin_credentials, self.timeouts.server_start)
            .await
            .map_err(|e| wf.fail("start_standalone", e))?;

        match self.online_transaction(&wf, actions).await {
            Ok(receipt) => {
                controller
                    .shutdown(connection)
                    .await
                    .map_err(|e| wf.fail("shutdown", e))?;
                Ok(wf.finish(Some(receipt), Vec::new()))
            }
            Err(err) => {
                if let Err(shutdown_err) = controller.shutdown(connection).await {
                    tracing::warn!(
                        workflow = wf.name,
                        error = %shutdown_err,
                        "shutdown after failed transaction also failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Request a graceful shutdown of the running server.
    ///
    /// Best-effort: process exit is not verified.
    pub async fn shutdown_server(&self) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("shutdown_server", &self.target);
        let mut controller = self.controller();

        let mut attempt = 1;
        let connection = loop {
            match controller.attach(&self.admin_credentials, self.timeouts.connect).await {
                Ok(connection) => break connection,
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    self.pause_before_retry(&wf, "connect", attempt, &err).await;
                    attempt += 1;
                }
                Err(err) => return Err(wf.fail("connect", err)),
            }
        };

        controller
            .shutdown(connection)
            .await
            .map_err(|e| wf.fail("shutdown", e))?;
        Ok(wf.finish(None, Vec::new()))
    }

    /// Run the keystore pipeline for `request` against this target.
    pub async fn provision_keystores(
        &self,
        pipeline: &KeystorePipeline,
        request: &KeystoreRequest,
    ) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("provision_keystores", &self.target);
        let report = pipeline
            .provision(&self.target, request)
            .map_err(|e| wf.fail("provision", e))?;
        Ok(wf.finish(None, report.artifacts))
    }

    /// Register the server under the node agent and hand its process over
    /// to agent control.
    ///
    /// Sequencing follows the enrollment ordering contract: start the admin
    /// server standalone, enroll through the live connection, shut the
    /// standalone process down, then connect to the agent and start the
    /// server under it.
    pub async fn enroll_under_agent(
        &self,
        record: EnrollmentRecord,
    ) -> Result<WorkflowReport, WorkflowError> {
        let wf = Workflow::begin("enroll_under_agent", &self.target);
        let mut controller = self.controller();
        let mut connection = controller
            .start_standalone(&self.admin_credentials, self.timeouts.server_start)
            .await
            .map_err(|e| wf.fail("start_standalone", e))?;

        let mut protocol = EnrollmentProtocol::new(self.admin.clone(), self.agent.clone())
            .with_operation_timeout(self.timeouts.operation);

        if let Err(err) = protocol.enroll(&mut connection, record).await {
            if let Err(shutdown_err) = controller.shutdown(connection).await {
                tracing::warn!(
                    workflow = wf.name,
                    error = %shutdown_err,
                    "shutdown after failed enroll also failed"
                );
            }
            return Err(wf.fail("enroll", err));
        }

        controller
            .shutdown(connection)
            .await
            .map_err(|e| wf.fail("shutdown", e))?;

        let mut attempt = 1;
        loop {
            match protocol
                .connect_agent(
                    &self.agent_credentials,
                    &self.target.domain_name,
                    self.timeouts.connect,
                )
                .await
            {
                Ok(()) => break,
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    self.pause_before_retry(&wf, "connect_agent", attempt, &err).await;
                    attempt += 1;
                }
                Err(err) => return Err(wf.fail("connect_agent", err)),
            }
        }

        protocol
            .start_under_agent()
            .await
            .map_err(|e| wf.fail("start_under_agent", e))?;
        Ok(wf.finish(None, Vec::new()))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn session(&self) -> SessionStateMachine<A> {
        SessionStateMachine::new(self.admin.clone(), self.target.clone()).with_timeouts(
            SessionTimeouts {
                connect: self.timeouts.connect,
                operation: self.timeouts.operation,
                activate: self.timeouts.activate,
            },
        )
    }

    fn controller(&self) -> ServerLifecycleController<A> {
        ServerLifecycleController::new(self.admin.clone(), self.target.clone(), self.launcher.clone())
            .with_operation_timeout(self.timeouts.operation)
    }

    async fn offline_transaction(
        &self,
        wf: &Workflow,
        source: &Path,
        actions: &[ConfigAction],
    ) -> Result<CommitReceipt, WorkflowError> {
        let mut session = self.session();
        session
            .begin_offline(source)
            .map_err(|e| wf.fail("begin_offline", e))?;
        if let Err(err) = apply_actions(&mut session, actions).await {
            session.abandon().await;
            return Err(wf.fail("apply_configuration", err));
        }
        session.commit().await.map_err(|e| wf.fail("commit", e))
    }

    async fn online_transaction(
        &self,
        wf: &Workflow,
        actions: &[ConfigAction],
    ) -> Result<CommitReceipt, WorkflowError> {
        let mut attempt = 1;
        loop {
            let mut session = self.session();
            match session.begin_online(&self.admin_credentials).await {
                Ok(()) => {
                    if let Err(err) = apply_actions(&mut session, actions).await {
                        session.abandon().await;
                        return Err(wf.fail("apply_configuration", err));
                    }
                    return session.commit().await.map_err(|e| wf.fail("commit", e));
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    self.pause_before_retry(wf, "begin_online", attempt, &err).await;
                    attempt += 1;
                }
                Err(err) => return Err(wf.fail("begin_online", err)),
            }
        }
    }

    async fn pause_before_retry(
        &self,
        wf: &Workflow,
        step: &'static str,
        attempt: u32,
        error: &dyn std::fmt::Display,
    ) {
        tracing::warn!(
            workflow = wf.name,
            step,
            attempt,
            error = %error,
            "retrying after retryable failure"
        );
        tokio::time::sleep(self.retry.backoff).await;
    }
}

async fn apply_actions<A: AdminClient>(
    session: &mut SessionStateMachine<A>,
    actions: &[ConfigAction],
) -> Result<(), SessionError> {
    for action in actions {
        match action {
            ConfigAction::Navigate(path) => session.navigate(path)?,
            ConfigAction::Set {
                path,
                attribute,
                value,
            } => session.set(path, attribute, value.clone()).await?,
        }
    }
    Ok(())
}
