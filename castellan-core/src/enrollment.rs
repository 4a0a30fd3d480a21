//! Node agent enrollment handshake phases.
//!
//! Enrollment registers a server's identity with a host-local node agent so
//! the agent may control its process lifecycle. The phase table makes the
//! ordering contract explicit: enroll, then connect to the agent, then
//! delegate start/kill.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Phase of the enrollment handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentPhase {
    /// The server is not registered with any agent.
    Unenrolled,
    /// The domain is registered with the agent; no live agent session.
    Enrolled,
    /// An authenticated agent session is open.
    AgentConnected,
    /// The managed server runs under agent control.
    ServerRunning,
}

/// Identity of one enrollment: which server, which domain directory, and
/// which agent. All fields are explicit values; nothing here is ambient
/// state shared across calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub server_name: String,
    pub domain_directory: PathBuf,
    pub node_agent_home: PathBuf,
    pub node_agent_address: String,
    pub node_agent_port: u16,
}

/// Outcome of an enroll call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// The registration was created.
    Enrolled,
    /// The server was already enrolled with an identical record; nothing
    /// changed.
    AlreadyEnrolled,
}

/// Error when a handshake operation is attempted out of order, or when a
/// re-enroll presents a conflicting record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum IllegalEnrollmentTransition {
    #[error("operation '{operation}' is not legal in enrollment phase '{from:?}'")]
    Phase {
        from: EnrollmentPhase,
        operation: &'static str,
    },

    /// Re-enrolling is an idempotent no-op only for an identical record; a
    /// different record for the same handshake is a conflict, not an
    /// update.
    #[error("server '{server_name}' is already enrolled with a different record")]
    RecordConflict { server_name: String },
}

/// Checked phase table for the enrollment handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentState {
    phase: EnrollmentPhase,
    record: Option<EnrollmentRecord>,
}

impl EnrollmentState {
    pub fn new() -> Self {
        Self {
            phase: EnrollmentPhase::Unenrolled,
            record: None,
        }
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.phase
    }

    pub fn record(&self) -> Option<&EnrollmentRecord> {
        self.record.as_ref()
    }

    /// Register `record`. Idempotent: enrolling again with an identical
    /// record is a no-op; a conflicting record is rejected.
    pub fn enroll(
        &mut self,
        record: EnrollmentRecord,
    ) -> Result<EnrollOutcome, IllegalEnrollmentTransition> {
        match self.phase {
            EnrollmentPhase::Unenrolled => {
                self.record = Some(record);
                self.phase = EnrollmentPhase::Enrolled;
                Ok(EnrollOutcome::Enrolled)
            }
            EnrollmentPhase::Enrolled => {
                if self.record.as_ref() == Some(&record) {
                    Ok(EnrollOutcome::AlreadyEnrolled)
                } else {
                    Err(IllegalEnrollmentTransition::RecordConflict {
                        server_name: record.server_name,
                    })
                }
            }
            from => Err(IllegalEnrollmentTransition::Phase {
                from,
                operation: "enroll",
            }),
        }
    }

    /// Mark the agent session connected. Only legal from `Enrolled`.
    pub fn connected(&mut self) -> Result<(), IllegalEnrollmentTransition> {
        self.step(EnrollmentPhase::Enrolled, EnrollmentPhase::AgentConnected, "connect")
    }

    /// Mark the managed server started under the agent. Only legal from
    /// `AgentConnected`.
    pub fn server_started(&mut self) -> Result<(), IllegalEnrollmentTransition> {
        self.step(
            EnrollmentPhase::AgentConnected,
            EnrollmentPhase::ServerRunning,
            "start",
        )
    }

    /// Mark the managed server killed. Only legal from `ServerRunning`; the
    /// agent session survives, so the phase returns to `AgentConnected`.
    pub fn server_killed(&mut self) -> Result<(), IllegalEnrollmentTransition> {
        self.step(
            EnrollmentPhase::ServerRunning,
            EnrollmentPhase::AgentConnected,
            "kill",
        )
    }

    /// Mark the agent session closed. Only legal from `AgentConnected`.
    pub fn disconnected(&mut self) -> Result<(), IllegalEnrollmentTransition> {
        self.step(
            EnrollmentPhase::AgentConnected,
            EnrollmentPhase::Enrolled,
            "disconnect",
        )
    }

    fn step(
        &mut self,
        expected: EnrollmentPhase,
        next: EnrollmentPhase,
        operation: &'static str,
    ) -> Result<(), IllegalEnrollmentTransition> {
        if self.phase != expected {
            return Err(IllegalEnrollmentTransition::Phase {
                from: self.phase,
                operation,
            });
        }
        self.phase = next;
        Ok(())
    }
}

impl Default for EnrollmentState {
    fn default() -> Self {
        Self::new()
    }
}
