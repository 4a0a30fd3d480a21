//! Administration console transport contract.

use std::time::Duration;

use async_trait::async_trait;
use castellan_core::{Credentials, DomainTarget};
use serde_json::Value;

use crate::error::AdminError;

/// Operation names understood by an administration endpoint.
///
/// The engine and every transport share this vocabulary; arguments travel as
/// JSON objects.
pub mod ops {
    /// Acquire the domain edit lock.
    pub const EDIT: &str = "edit";
    /// Open an edit transaction under the held lock.
    pub const START_EDIT: &str = "start_edit";
    /// Set an attribute at an absolute configuration path.
    /// Args: `{ "path": .., "attribute": .., "value": .. }`.
    pub const SET: &str = "set";
    /// Persist the pending transaction.
    pub const SAVE: &str = "save";
    /// Activate saved changes. Args: `{ "block": true }`.
    pub const ACTIVATE: &str = "activate";
    /// Revert unactivated changes to the pre-transaction configuration.
    pub const UNDO: &str = "undo";
    /// Release the edit lock, discarding the transaction.
    pub const CANCEL_EDIT: &str = "cancel_edit";
    /// Request graceful server shutdown.
    pub const SHUTDOWN: &str = "shutdown";
    /// Register the domain with the host-local node agent.
    /// Args: `{ "domain_directory": .., "node_agent_home": .. }`.
    pub const ENROLL: &str = "enroll";
}

/// Transport-level abstraction over the remote administration endpoint.
///
/// `invoke` is synchronous and blocking from the caller's perspective: each
/// call is awaited to completion and bounded by the supplied timeout. A
/// timeout surfaces as [`AdminError::Timeout`], distinct from a remote
/// operation failure, so callers can decide whether to retry. No retry or
/// backoff is built in; retry policy belongs to the orchestrator.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Live connection handle to one admin server.
    type Connection: Send;

    /// Connect and authenticate to the administration endpoint.
    async fn connect(
        &self,
        target: &DomainTarget,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self::Connection, AdminError>;

    /// Invoke a named operation with JSON arguments.
    async fn invoke(
        &self,
        connection: &mut Self::Connection,
        operation: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, AdminError>;

    /// Release the connection. Best-effort; errors are not surfaced.
    async fn disconnect(&self, connection: Self::Connection);
}
