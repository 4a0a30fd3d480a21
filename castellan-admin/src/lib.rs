//! Client contracts for Castellan's two external endpoints.
//!
//! This crate is intentionally IO-free: it defines the trait seams the
//! engine depends on and the transport error taxonomy, nothing else.
//! Concrete wire protocols are an external collaborator's concern; the core
//! only requires synchronous call semantics with a per-call timeout.
//!
//! - [`client::AdminClient`] - the administration console transport
//!   (connect / invoke / disconnect)
//! - [`agent::NodeAgentClient`] - the node agent endpoint (authenticated
//!   connect plus remote process control)
//! - [`error`] - `AdminError` / `AgentError` with the retryability policy

pub mod agent;
pub mod client;
pub mod error;

pub use agent::NodeAgentClient;
pub use client::{ops, AdminClient};
pub use error::{AdminError, AgentError};
