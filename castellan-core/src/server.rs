//! Managed server process state transitions.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerProcessState {
    /// No process; the server may be started.
    Stopped,
    /// Process launched, administrative endpoint not yet reachable.
    Starting,
    /// Administrative connection established.
    Running,
    /// Graceful shutdown requested.
    ShuttingDown,
    /// A start attempt timed out. Terminal: requires operator intervention
    /// and is never auto-retried.
    Unreachable,
}

impl ServerProcessState {
    /// Returns true if the state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unreachable)
    }
}

/// Events that drive [`ServerProcessState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A start was requested and the process was launched.
    StartRequested,
    /// The administrative endpoint accepted a connection.
    Connected,
    /// A graceful shutdown was requested.
    ShutdownRequested,
    /// The shutdown request was accepted.
    Exited,
    /// The start attempt exhausted its timeout.
    StartTimedOut,
}

impl ProcessEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartRequested => "start_requested",
            Self::Connected => "connected",
            Self::ShutdownRequested => "shutdown_requested",
            Self::Exited => "exited",
            Self::StartTimedOut => "start_timed_out",
        }
    }
}

/// Error when a process event is applied in a state that does not admit it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply '{}' to a server process in state '{from:?}'", event.name())]
pub struct IllegalProcessTransition {
    pub from: ServerProcessState,
    pub event: ProcessEvent,
}

impl ServerProcessState {
    /// Apply an event, returning the successor state.
    ///
    /// Transitions are only legal along
    /// `Stopped → Starting → Running → ShuttingDown → Stopped`, with
    /// `Starting → Unreachable` on a timed-out start. `Unreachable` admits
    /// nothing.
    pub fn apply(self, event: ProcessEvent) -> Result<Self, IllegalProcessTransition> {
        use ProcessEvent::*;
        use ServerProcessState::*;

        match (self, event) {
            (Stopped, StartRequested) => Ok(Starting),
            (Starting, Connected) => Ok(Running),
            (Starting, StartTimedOut) => Ok(Unreachable),
            (Running, ShutdownRequested) => Ok(ShuttingDown),
            (ShuttingDown, Exited) => Ok(Stopped),
            (from, event) => Err(IllegalProcessTransition { from, event }),
        }
    }
}
