//! Transactional configuration sessions.
//!
//! One state machine serves both editing modes. Offline template editing
//! loads a JSON configuration tree from a template source, mutates it in
//! memory, and serializes it into the domain directory on commit, with no
//! running admin server involved. Online editing opens a live edit lock
//! against the admin server (`edit` then `start_edit`), sends each mutation
//! over the wire, and commits with `save` followed by a blocking `activate`.
//! An activation failure rolls the transaction back to the pre-edit
//! configuration before the error is reported.

use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use castellan_admin::{ops, AdminClient, AdminError};
use castellan_core::session::{
    resolve_path, InvalidSessionTransition, SessionMode, SessionPhase, SessionState,
};
use castellan_core::{CommitReceipt, Credentials, DomainTarget};
use serde_json::{json, Value};

/// Timeouts applied to the session's remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Budget for the initial connect.
    pub connect: Duration,
    /// Budget for each ordinary operation (`edit`, `set`, `save`, ...).
    pub operation: Duration,
    /// Budget for the blocking `activate` call.
    pub activate: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            operation: Duration::from_secs(30),
            activate: Duration::from_secs(120),
        }
    }
}

/// Errors from a configuration session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// An operation was attempted in a phase that does not admit it.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidSessionTransition),

    /// Another edit session already holds the domain lock.
    #[error("edit lock is held{}", owner.as_deref().map(|o| format!(" by {o}")).unwrap_or_default())]
    LockHeld { owner: Option<String> },

    /// A remote call failed (connection, timeout, or remote failure).
    #[error(transparent)]
    Admin(AdminError),

    /// Activation failed; the transaction was rolled back to the pre-edit
    /// configuration before this was reported.
    #[error("activation failed, transaction rolled back: {source}")]
    ActivationFailed {
        #[source]
        source: AdminError,
    },

    /// The template source could not be read.
    #[error("failed to read template '{path}': {source}")]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template source is not a JSON object tree.
    #[error("failed to parse template '{path}': {source}")]
    TemplateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The configuration path does not exist in the offline domain model.
    #[error("configuration path not found: {path}")]
    PathNotFound { path: String },

    /// Writing the domain directory failed during an offline commit.
    #[error("failed to write domain at '{path}': {source}")]
    DomainWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// Whether the workflow layer may retry the failed call.
    ///
    /// Only transport timeouts qualify; a held lock is surfaced, never
    /// blindly retried, and an activation failure is fatal by policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Admin(e) if e.is_retryable())
    }
}

fn map_admin(err: AdminError) -> SessionError {
    match err {
        AdminError::LockHeld { owner } => SessionError::LockHeld { owner },
        other => SessionError::Admin(other),
    }
}

/// In-memory domain configuration tree for offline editing.
///
/// A JSON object tree navigated by `/`-separated paths; leaves under a node
/// are its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainModel {
    root: Value,
}

impl DomainModel {
    fn load(path: &Path) -> Result<Self, SessionError> {
        let bytes = fs::read(path).map_err(|source| SessionError::TemplateIo {
            path: path.to_path_buf(),
            source,
        })?;
        let root: Value =
            serde_json::from_slice(&bytes).map_err(|source| SessionError::TemplateParse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { root })
    }

    pub(crate) fn from_value(root: Value) -> Self {
        Self { root }
    }

    fn node(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    fn node_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut current = &mut self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.as_object_mut()?.get_mut(segment)?;
        }
        Some(current)
    }

    /// True when `path` names an existing node.
    pub fn contains(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    /// Set `attribute` on the node at `path`.
    ///
    /// The node must exist in the tree; template editing mutates nodes the
    /// template defines, it does not create them.
    pub fn set(&mut self, path: &str, attribute: &str, value: Value) -> Result<(), SessionError> {
        let node = self
            .node_mut(path)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| SessionError::PathNotFound {
                path: path.to_string(),
            })?;
        node.insert(attribute.to_string(), value);
        Ok(())
    }

    fn to_json(&self) -> Vec<u8> {
        let mut out = serde_json::to_vec_pretty(&self.root).unwrap_or_default();
        out.push(b'\n');
        out
    }
}

enum Backend<A: AdminClient> {
    Idle,
    Offline(DomainModel),
    Online(A::Connection),
}

/// Governs one transactional configuration session against a single
/// [`DomainTarget`].
///
/// The admin server's edit lock is the actual serialization point for
/// concurrent workflows; this machine enforces legal operation ordering on
/// the caller's side and surfaces lock contention as
/// [`SessionError::LockHeld`].
pub struct SessionStateMachine<A: AdminClient> {
    client: Arc<A>,
    target: DomainTarget,
    timeouts: SessionTimeouts,
    state: SessionState,
    backend: Backend<A>,
}

impl<A: AdminClient> SessionStateMachine<A> {
    pub fn new(client: Arc<A>, target: DomainTarget) -> Self {
        Self {
            client,
            target,
            timeouts: SessionTimeouts::default(),
            state: SessionState::new(),
            backend: Backend::Idle,
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The pure session state: phase, mode, cursor, pending changes.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Open an offline template session: load `template_source` and create a
    /// new domain identity at the target's domain directory on commit.
    ///
    /// Only legal from `Closed`.
    pub fn begin_offline(&mut self, template_source: &Path) -> Result<(), SessionError> {
        self.state.begin(SessionMode::OfflineTemplate)?;
        match DomainModel::load(template_source) {
            Ok(model) => {
                tracing::info!(
                    template = %template_source.display(),
                    domain = %self.target.domain_name,
                    "opened offline template session"
                );
                self.backend = Backend::Offline(model);
                self.state.opened()?;
                Ok(())
            }
            Err(err) => {
                self.state.close();
                Err(err)
            }
        }
    }

    /// Open an online edit session: connect, acquire the edit lock, and
    /// start the transaction.
    ///
    /// Only legal from `Closed`. Fails with [`SessionError::LockHeld`] when
    /// another edit session is active; the caller decides how to proceed.
    pub async fn begin_online(&mut self, credentials: &Credentials) -> Result<(), SessionError> {
        self.state.begin(SessionMode::OnlineEdit)?;
        match self.open_online(credentials).await {
            Ok(connection) => {
                tracing::info!(
                    url = %self.target.admin_url(),
                    domain = %self.target.domain_name,
                    "opened online edit session"
                );
                self.backend = Backend::Online(connection);
                self.state.opened()?;
                Ok(())
            }
            Err(err) => {
                self.state.close();
                Err(err)
            }
        }
    }

    async fn open_online(&self, credentials: &Credentials) -> Result<A::Connection, SessionError> {
        let mut connection = self
            .client
            .connect(&self.target, credentials, self.timeouts.connect)
            .await
            .map_err(map_admin)?;

        for op in [ops::EDIT, ops::START_EDIT] {
            if let Err(err) = self
                .client
                .invoke(&mut connection, op, json!({}), self.timeouts.operation)
                .await
            {
                self.client.disconnect(connection).await;
                return Err(map_admin(err));
            }
        }
        Ok(connection)
    }

    /// Move the navigation cursor. Only legal while `Open`.
    pub fn navigate(&mut self, path: &str) -> Result<(), SessionError> {
        if self.state.is_open() {
            let resolved = resolve_path(self.state.cursor(), path);
            if let Backend::Offline(model) = &self.backend {
                if !model.contains(&resolved) {
                    return Err(SessionError::PathNotFound { path: resolved });
                }
            }
        }
        self.state.navigate(path)?;
        Ok(())
    }

    /// Set `attribute` at `path` (resolved against the cursor). Only legal
    /// while `Open`.
    pub async fn set(
        &mut self,
        path: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        if !self.state.is_open() {
            return Err(InvalidSessionTransition {
                from: self.state.phase(),
                operation: "set",
            }
            .into());
        }
        let resolved = resolve_path(self.state.cursor(), path);

        match &mut self.backend {
            Backend::Offline(model) => model.set(&resolved, attribute, value)?,
            Backend::Online(connection) => {
                let args = json!({
                    "path": resolved,
                    "attribute": attribute,
                    "value": value,
                });
                self.client
                    .invoke(connection, ops::SET, args, self.timeouts.operation)
                    .await
                    .map_err(map_admin)?;
            }
            Backend::Idle => {
                return Err(InvalidSessionTransition {
                    from: self.state.phase(),
                    operation: "set",
                }
                .into())
            }
        }

        self.state.record_change(path, attribute)?;
        tracing::debug!(path = %resolved, attribute, "recorded configuration change");
        Ok(())
    }

    /// Commit the session. The session is closed exactly once whatever the
    /// outcome.
    ///
    /// Offline: serializes the domain model into the target's domain
    /// directory, replacing any existing domain at that path.
    ///
    /// Online: `save` then blocking `activate`. An activation failure rolls
    /// the transaction back (`undo` + `cancel_edit`) and reports
    /// [`SessionError::ActivationFailed`]; a half-applied change is never
    /// left behind. The receipt's `requires_restart` flag tells the caller
    /// whether the committed changes only take effect after a server
    /// restart; the machine does not restart the server itself.
    pub async fn commit(mut self) -> Result<CommitReceipt, SessionError> {
        self.state.begin_commit()?;
        let backend = mem::replace(&mut self.backend, Backend::Idle);

        match backend {
            Backend::Offline(model) => {
                let receipt = self.state.close();
                self.write_domain(&model)?;
                tracing::info!(
                    domain = %self.target.domain_name,
                    changes = receipt.changes_applied,
                    "committed offline session"
                );
                Ok(receipt)
            }
            Backend::Online(mut connection) => {
                if let Err(err) = self
                    .client
                    .invoke(&mut connection, ops::SAVE, json!({}), self.timeouts.operation)
                    .await
                {
                    self.rollback_online(&mut connection).await;
                    self.client.disconnect(connection).await;
                    self.state.close();
                    return Err(map_admin(err));
                }

                let activate_args = json!({ "block": true });
                if let Err(err) = self
                    .client
                    .invoke(&mut connection, ops::ACTIVATE, activate_args, self.timeouts.activate)
                    .await
                {
                    self.rollback_online(&mut connection).await;
                    self.client.disconnect(connection).await;
                    self.state.close();
                    return Err(SessionError::ActivationFailed { source: err });
                }

                self.client.disconnect(connection).await;
                let receipt = self.state.close();
                tracing::info!(
                    domain = %self.target.domain_name,
                    changes = receipt.changes_applied,
                    requires_restart = receipt.requires_restart,
                    "committed online session"
                );
                Ok(receipt)
            }
            Backend::Idle => Err(InvalidSessionTransition {
                from: self.state.phase(),
                operation: "commit",
            }
            .into()),
        }
    }

    /// Roll back and close without committing.
    ///
    /// For error containment: an orchestrator that hits a failure mid-
    /// transaction must not leave the session dangling open. Online
    /// rollback is best-effort; failures are logged, not surfaced.
    pub async fn abandon(mut self) {
        match mem::replace(&mut self.backend, Backend::Idle) {
            Backend::Online(mut connection) => {
                self.rollback_online(&mut connection).await;
                self.client.disconnect(connection).await;
            }
            Backend::Offline(_) | Backend::Idle => {}
        }
        if self.state.phase() != SessionPhase::Closed {
            tracing::warn!(domain = %self.target.domain_name, "abandoned configuration session");
        }
        self.state.close();
    }

    async fn rollback_online(&self, connection: &mut A::Connection) {
        for op in [ops::UNDO, ops::CANCEL_EDIT] {
            if let Err(err) = self
                .client
                .invoke(connection, op, json!({}), self.timeouts.operation)
                .await
            {
                tracing::warn!(operation = op, error = %err, "rollback operation failed");
            }
        }
    }

    fn write_domain(&self, model: &DomainModel) -> Result<(), SessionError> {
        let domain_dir = self.target.domain_dir();
        let write = |source| SessionError::DomainWrite {
            path: domain_dir.clone(),
            source,
        };

        // Overwrite policy is explicit: an existing domain at this path is
        // replaced, not merged.
        if domain_dir.exists() {
            fs::remove_dir_all(&domain_dir).map_err(write)?;
        }
        let config_dir = domain_dir.join("config");
        fs::create_dir_all(&config_dir).map_err(write)?;
        fs::write(config_dir.join("config.json"), model.to_json()).map_err(write)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> DomainModel {
        DomainModel::from_value(json!({
            "Name": "template_domain",
            "Servers": {
                "AdminServer": {
                    "ListenPort": 7001,
                    "SSL": { "AdminServer": { "Enabled": false } }
                }
            }
        }))
    }

    #[test]
    fn contains_walks_the_tree() {
        let m = model();
        assert!(m.contains("/"));
        assert!(m.contains("/Servers/AdminServer"));
        assert!(m.contains("/Servers/AdminServer/SSL/AdminServer"));
        assert!(!m.contains("/Servers/Other"));
    }

    #[test]
    fn set_updates_existing_node() {
        let mut m = model();
        m.set("/Servers/AdminServer", "ListenPort", json!(8001)).unwrap();
        assert_eq!(
            m.node("/Servers/AdminServer").unwrap()["ListenPort"],
            json!(8001)
        );
    }

    #[test]
    fn set_on_missing_path_rejected() {
        let mut m = model();
        let err = m.set("/Servers/Missing", "ListenPort", json!(1)).unwrap_err();
        assert!(matches!(err, SessionError::PathNotFound { .. }));
    }

    #[test]
    fn set_can_add_new_attribute() {
        let mut m = model();
        m.set("/", "AdministrationPortEnabled", json!(true)).unwrap();
        assert_eq!(m.node("/").unwrap()["AdministrationPortEnabled"], json!(true));
    }
}
