//! Test harnesses: in-memory administration endpoint and node agent.
//!
//! The admin endpoint models the edit-lock transaction semantics the engine
//! drives (`edit`/`start_edit`/`set`/`save`/`activate`/`undo`/
//! `cancel_edit`), directly in process with no network, the same pattern as
//! a direct service-to-client test daemon.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use castellan_admin::{ops, AdminClient, AdminError, AgentError, NodeAgentClient};
use castellan_core::{Credentials, DomainTarget, Scheme};
use castellan_engine::lifecycle::{LifecycleError, ProcessLauncher};
use serde_json::{json, Value};
use uuid::Uuid;

/// Install a test subscriber honoring `RUST_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Conventional test credentials for the admin endpoint.
pub fn admin_credentials() -> Credentials {
    Credentials::new("system", "s3cret-admin")
}

/// Conventional test credentials for the node agent.
pub fn agent_credentials() -> Credentials {
    Credentials::new("agent", "s3cret-agent")
}

/// A target pointing at `127.0.0.1:<port>` with the conventional test
/// domain.
pub fn target(port: u16, domains_root: &Path) -> DomainTarget {
    DomainTarget::new(Scheme::T3, "127.0.0.1", port, "base_domain", domains_root)
}

/// The configuration tree the in-memory admin server starts from, shaped
/// like a minimal single-server domain.
pub fn base_config() -> Value {
    json!({
        "Name": "base_domain",
        "AdministrationPortEnabled": false,
        "Servers": {
            "AdminServer": {
                "ListenPort": 7001,
                "SSL": {
                    "AdminServer": { "Enabled": false }
                }
            }
        }
    })
}

/// A launcher that launches nothing: the "process" is whatever the test
/// has (or has not) bound on the target port.
pub struct StubLauncher;

impl ProcessLauncher for StubLauncher {
    fn launch(&self, _target: &DomainTarget) -> Result<(), LifecycleError> {
        Ok(())
    }
}

// ============================================================================
// In-Memory Admin Endpoint
// ============================================================================

#[derive(Debug)]
struct AdminState {
    config: Value,
    locked_by: Option<Uuid>,
    snapshot: Option<Value>,
    working: Option<Value>,
    saved: Option<Value>,
    fail_activation: bool,
    enrollments: Vec<Value>,
    shutdown_requests: u32,
    connects: u32,
}

/// Connection token handed out by [`InMemoryAdmin`].
#[derive(Debug)]
pub struct AdminConnection {
    id: Uuid,
}

/// In-memory administration endpoint with edit-lock transaction semantics.
pub struct InMemoryAdmin {
    credentials: Credentials,
    timeout_connects: Mutex<u32>,
    state: Mutex<AdminState>,
}

impl InMemoryAdmin {
    pub fn new(credentials: Credentials, config: Value) -> Self {
        Self {
            credentials,
            timeout_connects: Mutex::new(0),
            state: Mutex::new(AdminState {
                config,
                locked_by: None,
                snapshot: None,
                working: None,
                saved: None,
                fail_activation: false,
                enrollments: Vec::new(),
                shutdown_requests: 0,
                connects: 0,
            }),
        }
    }

    /// Make every subsequent `activate` fail.
    pub fn fail_activation(&self) {
        self.state.lock().unwrap().fail_activation = true;
    }

    /// Fail the next `count` connect attempts with a timeout.
    pub fn timeout_connects_for(&self, count: u32) {
        *self.timeout_connects.lock().unwrap() = count;
    }

    /// The currently activated configuration.
    pub fn config(&self) -> Value {
        self.state.lock().unwrap().config.clone()
    }

    /// True while some connection holds the edit lock.
    pub fn lock_held(&self) -> bool {
        self.state.lock().unwrap().locked_by.is_some()
    }

    pub fn enrollments(&self) -> Vec<Value> {
        self.state.lock().unwrap().enrollments.clone()
    }

    pub fn shutdown_requests(&self) -> u32 {
        self.state.lock().unwrap().shutdown_requests
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    fn remote(operation: &str, message: &str) -> AdminError {
        AdminError::Remote {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

/// Set `attribute` on the object node at `path` inside `root`.
fn set_at(root: &mut Value, path: &str, attribute: &str, value: Value) -> Result<(), ()> {
    let mut current = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current = current
            .as_object_mut()
            .and_then(|o| o.get_mut(segment))
            .ok_or(())?;
    }
    current
        .as_object_mut()
        .ok_or(())?
        .insert(attribute.to_string(), value);
    Ok(())
}

#[async_trait]
impl AdminClient for InMemoryAdmin {
    type Connection = AdminConnection;

    async fn connect(
        &self,
        _target: &DomainTarget,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self::Connection, AdminError> {
        self.state.lock().unwrap().connects += 1;

        let mut timeouts = self.timeout_connects.lock().unwrap();
        if *timeouts > 0 {
            *timeouts -= 1;
            return Err(AdminError::Timeout {
                operation: "connect".to_string(),
                timeout,
            });
        }
        drop(timeouts);

        if !self
            .credentials
            .matches(&credentials.username, credentials.password.expose())
        {
            return Err(AdminError::Connection("authentication denied".to_string()));
        }
        Ok(AdminConnection { id: Uuid::new_v4() })
    }

    async fn invoke(
        &self,
        connection: &mut Self::Connection,
        operation: &str,
        args: Value,
        _timeout: Duration,
    ) -> Result<Value, AdminError> {
        let mut state = self.state.lock().unwrap();
        match operation {
            ops::EDIT => {
                if let Some(owner) = state.locked_by {
                    if owner != connection.id {
                        return Err(AdminError::LockHeld {
                            owner: Some(owner.to_string()),
                        });
                    }
                }
                state.locked_by = Some(connection.id);
                Ok(json!({}))
            }
            ops::START_EDIT => {
                if state.locked_by != Some(connection.id) {
                    return Err(Self::remote(operation, "edit lock not held"));
                }
                state.snapshot = Some(state.config.clone());
                state.working = Some(state.config.clone());
                Ok(json!({}))
            }
            ops::SET => {
                if state.locked_by != Some(connection.id) {
                    return Err(Self::remote(operation, "edit lock not held"));
                }
                let path = args["path"].as_str().unwrap_or_default().to_string();
                let attribute = args["attribute"].as_str().unwrap_or_default().to_string();
                let value = args["value"].clone();
                let working = state
                    .working
                    .as_mut()
                    .ok_or_else(|| Self::remote(operation, "no open edit transaction"))?;
                set_at(working, &path, &attribute, value)
                    .map_err(|()| Self::remote(operation, "path not found"))?;
                Ok(json!({}))
            }
            ops::SAVE => {
                state.saved = state.working.clone();
                Ok(json!({}))
            }
            ops::ACTIVATE => {
                if state.fail_activation {
                    return Err(Self::remote(operation, "distribution of changes failed"));
                }
                if let Some(saved) = state.saved.take() {
                    state.config = saved;
                }
                // Activation applies and closes the transaction.
                state.working = None;
                state.snapshot = None;
                state.locked_by = None;
                Ok(json!({}))
            }
            ops::UNDO => {
                if let Some(snapshot) = state.snapshot.clone() {
                    state.working = Some(snapshot);
                    state.saved = None;
                }
                Ok(json!({}))
            }
            ops::CANCEL_EDIT => {
                if state.locked_by == Some(connection.id) {
                    state.locked_by = None;
                    state.working = None;
                    state.snapshot = None;
                    state.saved = None;
                }
                Ok(json!({}))
            }
            ops::SHUTDOWN => {
                state.shutdown_requests += 1;
                Ok(json!({}))
            }
            ops::ENROLL => {
                state.enrollments.push(args);
                Ok(json!({}))
            }
            other => Err(Self::remote(other, "unknown operation")),
        }
    }

    async fn disconnect(&self, _connection: Self::Connection) {}
}

// ============================================================================
// In-Memory Node Agent
// ============================================================================

#[derive(Debug, Default)]
struct AgentState {
    connect_attempts: u32,
    running: Vec<String>,
    kills: Vec<String>,
}

/// Session token handed out by [`InMemoryAgent`].
#[derive(Debug)]
pub struct AgentSession {
    id: Uuid,
}

/// In-memory node agent with credential checking and a configurable number
/// of initial unreachable connect attempts.
pub struct InMemoryAgent {
    credentials: Credentials,
    unreachable_attempts: Mutex<u32>,
    state: Mutex<AgentState>,
}

impl InMemoryAgent {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            unreachable_attempts: Mutex::new(0),
            state: Mutex::new(AgentState::default()),
        }
    }

    /// Fail the next `count` connect attempts with `Unreachable`.
    pub fn unreachable_for(&self, count: u32) {
        *self.unreachable_attempts.lock().unwrap() = count;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    /// Servers currently running under the agent.
    pub fn running(&self) -> Vec<String> {
        self.state.lock().unwrap().running.clone()
    }

    pub fn kills(&self) -> Vec<String> {
        self.state.lock().unwrap().kills.clone()
    }
}

#[async_trait]
impl NodeAgentClient for InMemoryAgent {
    type Session = AgentSession;

    async fn connect(
        &self,
        credentials: &Credentials,
        address: &str,
        port: u16,
        _domain_name: &str,
        _domain_directory: &Path,
        _timeout: Duration,
    ) -> Result<Self::Session, AgentError> {
        self.state.lock().unwrap().connect_attempts += 1;

        let mut unreachable = self.unreachable_attempts.lock().unwrap();
        if *unreachable > 0 {
            *unreachable -= 1;
            return Err(AgentError::Unreachable {
                address: address.to_string(),
                port,
                message: "connection refused".to_string(),
            });
        }
        drop(unreachable);

        if !self
            .credentials
            .matches(&credentials.username, credentials.password.expose())
        {
            return Err(AgentError::Authentication);
        }
        Ok(AgentSession { id: Uuid::new_v4() })
    }

    async fn start_server(
        &self,
        _session: &mut Self::Session,
        server_name: &str,
        _domain_directory: &Path,
    ) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        state.running.push(server_name.to_string());
        Ok(())
    }

    async fn kill_server(
        &self,
        _session: &mut Self::Session,
        server_name: &str,
    ) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.running.iter().position(|s| s == server_name) {
            state.running.remove(pos);
            state.kills.push(server_name.to_string());
            Ok(())
        } else {
            Err(AgentError::Operation {
                operation: "kill".to_string(),
                message: format!("server '{server_name}' is not running"),
            })
        }
    }

    async fn disconnect(&self, _session: Self::Session) {}
}

/// Write a minimal domain template file and return its path.
pub fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("template.json");
    std::fs::write(&path, base_config().to_string()).unwrap();
    path
}
