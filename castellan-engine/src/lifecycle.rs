//! Out-of-process server lifecycle control.
//!
//! Starts a managed server outside node agent control, waits for its
//! administrative endpoint to become reachable, and connects. The start
//! timeout is the single most important bound in the system: every workflow
//! is gated on it, and a start that exhausts it leaves the server in the
//! terminal `Unreachable` state for an operator to resolve.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use castellan_admin::{ops, AdminClient, AdminError};
use castellan_core::server::{IllegalProcessTransition, ProcessEvent, ServerProcessState};
use castellan_core::{Credentials, DomainTarget};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

/// Default start script, relative to the domain directory.
const START_SCRIPT: &str = "bin/start-server.sh";

/// Errors from the lifecycle controller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// The requested operation is not legal in the current process state.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalProcessTransition),

    /// Launching the server process failed.
    #[error("failed to launch server process '{script}': {source}")]
    Launch {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The server did not become reachable within the start timeout.
    #[error("server at {url} did not become reachable within {timeout:?}")]
    StartTimeout { url: String, timeout: Duration },

    /// A remote call failed after the server was reachable.
    #[error(transparent)]
    Admin(AdminError),
}

impl LifecycleError {
    /// Whether the workflow layer may retry the failed call.
    ///
    /// A start timeout is never retryable: the controller is already in the
    /// terminal `Unreachable` state and the condition needs an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Admin(err) if err.is_retryable())
    }
}

/// Launches the managed server process.
///
/// A seam so agent-managed and test scenarios can substitute their own
/// launch behavior.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, target: &DomainTarget) -> Result<(), LifecycleError>;
}

/// Launches the domain's start script as a detached child process.
pub struct ScriptLauncher {
    script: PathBuf,
}

impl ScriptLauncher {
    pub fn new() -> Self {
        Self {
            script: PathBuf::from(START_SCRIPT),
        }
    }

    /// Use a different script path, relative to the domain directory.
    pub fn with_script(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl Default for ScriptLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for ScriptLauncher {
    fn launch(&self, target: &DomainTarget) -> Result<(), LifecycleError> {
        let domain_dir = target.domain_dir();
        let script = domain_dir.join(&self.script);

        let mut child = Command::new(&script)
            .current_dir(&domain_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LifecycleError::Launch {
                script: script.clone(),
                source,
            })?;

        let pid = child.id();
        tracing::info!(script = %script.display(), pid, "launched server process");

        // Reap the child when it eventually exits so it does not linger as
        // a zombie.
        tokio::spawn(async move {
            match child.wait() {
                Ok(status) => tracing::info!(pid, %status, "server process exited"),
                Err(err) => tracing::error!(pid, error = %err, "failed waiting for server process"),
            }
        });

        Ok(())
    }
}

/// Starts and stops one managed server process and tracks its state.
pub struct ServerLifecycleController<A: AdminClient> {
    client: Arc<A>,
    target: DomainTarget,
    launcher: Arc<dyn ProcessLauncher>,
    state: ServerProcessState,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl<A: AdminClient> ServerLifecycleController<A> {
    pub fn new(client: Arc<A>, target: DomainTarget, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            client,
            target,
            launcher,
            state: ServerProcessState::Stopped,
            poll_interval: Duration::from_millis(250),
            operation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    /// Current observed process state.
    pub fn state(&self) -> ServerProcessState {
        self.state
    }

    /// Start the server outside node agent control, block until its
    /// administrative endpoint accepts connections or `timeout` elapses,
    /// then connect.
    ///
    /// Exhausting the timeout transitions the controller to the terminal
    /// `Unreachable` state and returns [`LifecycleError::StartTimeout`];
    /// recovery requires operator intervention, never an automatic retry.
    /// The connection scheme is opaque: reachability is probed at the
    /// TCP level and the scheme only travels into `AdminClient::connect`.
    pub async fn start_standalone(
        &mut self,
        credentials: &Credentials,
        timeout_budget: Duration,
    ) -> Result<A::Connection, LifecycleError> {
        let starting = self.state.apply(ProcessEvent::StartRequested)?;
        self.launcher.launch(&self.target)?;
        self.state = starting;

        let url = self.target.admin_url();
        tracing::info!(%url, timeout = ?timeout_budget, "waiting for server to become reachable");

        let deadline = Instant::now() + timeout_budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = self.state.apply(ProcessEvent::StartTimedOut)?;
                return Err(LifecycleError::StartTimeout {
                    url,
                    timeout: timeout_budget,
                });
            }

            let attempt = TcpStream::connect((self.target.host.as_str(), self.target.port));
            match timeout(remaining, attempt).await {
                Ok(Ok(_stream)) => break,
                Ok(Err(_refused)) => {
                    sleep(self.poll_interval.min(remaining)).await;
                }
                Err(_elapsed) => {
                    // The connect attempt itself consumed the remaining
                    // budget; the next iteration reports the timeout.
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.state = self.state.apply(ProcessEvent::StartTimedOut)?;
            return Err(LifecycleError::StartTimeout {
                url,
                timeout: timeout_budget,
            });
        }

        match self.client.connect(&self.target, credentials, remaining).await {
            Ok(connection) => {
                self.state = self.state.apply(ProcessEvent::Connected)?;
                tracing::info!(%url, "server is running");
                Ok(connection)
            }
            Err(AdminError::Timeout { .. }) => {
                self.state = self.state.apply(ProcessEvent::StartTimedOut)?;
                Err(LifecycleError::StartTimeout {
                    url,
                    timeout: timeout_budget,
                })
            }
            Err(err) => Err(LifecycleError::Admin(err)),
        }
    }

    /// Connect to an already-running server without launching it.
    ///
    /// Adopts external reality: on success the controller considers the
    /// server `Running` regardless of its previous observed state, so a
    /// later [`shutdown`](Self::shutdown) is legal.
    pub async fn attach(
        &mut self,
        credentials: &Credentials,
        timeout_budget: Duration,
    ) -> Result<A::Connection, LifecycleError> {
        let connection = self
            .client
            .connect(&self.target, credentials, timeout_budget)
            .await
            .map_err(LifecycleError::Admin)?;
        self.state = ServerProcessState::Running;
        Ok(connection)
    }

    /// Request a graceful shutdown over `connection`.
    ///
    /// Best-effort by design: the shutdown request is issued and the
    /// connection released, but process exit is not verified. A stricter
    /// caller may poll the endpoint afterwards, but should treat that as a
    /// deliberate enhancement over the reference behavior.
    pub async fn shutdown(&mut self, mut connection: A::Connection) -> Result<(), LifecycleError> {
        self.state = self.state.apply(ProcessEvent::ShutdownRequested)?;

        let result = self
            .client
            .invoke(&mut connection, ops::SHUTDOWN, json!({}), self.operation_timeout)
            .await;
        self.client.disconnect(connection).await;

        match result {
            Ok(_) => {
                self.state = self.state.apply(ProcessEvent::Exited)?;
                tracing::info!(url = %self.target.admin_url(), "shutdown requested");
                Ok(())
            }
            Err(err) => Err(LifecycleError::Admin(err)),
        }
    }
}
