//! # Castellan Core
//!
//! Pure domain types and state machines for the Castellan domain
//! configuration orchestration core.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No subprocess invocations
//!
//! All types are plain Rust structs/enums with serde serialization. The
//! actual IO (remote administration calls, process control, keystore tool
//! invocation) lives in `castellan-engine`.
//!
//! The state machines here reject illegal operation orderings at the API
//! boundary instead of letting them fail deep inside a remote call: session
//! phase walks, server process transitions, and enrollment handshake phases
//! are all checked moves returning typed transition errors.
//!
//! ## Modules
//!
//! - [`target`] - Administration endpoint identity and path composition
//! - [`credentials`] - Username/password pairs with zeroized secrets
//! - [`session`] - Configuration session phases, cursor, restart analysis
//! - [`server`] - Managed server process state transitions
//! - [`enrollment`] - Node agent enrollment handshake phases
//! - [`keystore`] - Keystore artifact model and pipeline step ordering

pub mod credentials;
pub mod enrollment;
pub mod keystore;
pub mod server;
pub mod session;
pub mod target;

pub use credentials::{Credentials, Password};
pub use enrollment::{
    EnrollOutcome, EnrollmentPhase, EnrollmentRecord, EnrollmentState,
    IllegalEnrollmentTransition,
};
pub use keystore::{KeystoreArtifact, KeystoreKind, PipelineStep};
pub use server::{IllegalProcessTransition, ProcessEvent, ServerProcessState};
pub use session::{
    ChangeRecord, CommitReceipt, InvalidSessionTransition, SessionMode, SessionPhase,
    SessionState,
};
pub use target::{DomainTarget, Scheme};
