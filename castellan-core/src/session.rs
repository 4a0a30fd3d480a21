//! Configuration session phases, navigation cursor, and restart analysis.
//!
//! The pure half of the session state machine: which operations are legal in
//! which phase, where the navigation cursor points, and whether the recorded
//! change set needs a server restart to take effect. The IO half (remote
//! calls, template loading, domain serialization) lives in the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Attributes whose change only takes effect after a server restart.
///
/// Reconfiguring the administration port, or anything under a server's SSL
/// subtree, requires the caller to sequence shutdown/restart around the
/// commit. The session only reports the condition; it never restarts the
/// server itself.
const RESTART_ATTRIBUTES: &[&str] = &["AdministrationPort", "AdministrationPortEnabled"];

/// Editing mode of a configuration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Constructing a new domain from a template, no running admin server.
    OfflineTemplate,
    /// Transactional live edit against a running admin server.
    OnlineEdit,
}

/// Phase of a configuration session.
///
/// Legal walk: `Closed → Opening → Open → Committing → Closed`. A failed
/// open or commit returns the session to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Closed,
    Opening,
    Open,
    Committing,
}

/// Error when an operation is attempted in the wrong session phase.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation '{operation}' is not legal in session phase '{from:?}'")]
pub struct InvalidSessionTransition {
    pub from: SessionPhase,
    pub operation: &'static str,
}

/// One recorded mutation: the absolute config-tree path and the attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub attribute: String,
}

/// Result of a committed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub mode: SessionMode,
    /// True when the committed change set only takes effect after a server
    /// restart (administration port or SSL listener changes).
    pub requires_restart: bool,
    /// Number of mutations applied in this transaction.
    pub changes_applied: usize,
}

/// Pure state of one configuration session: phase, mode, cursor, dirty flag,
/// and the ordered change records of the open transaction.
///
/// Invariant: at most one open session exists per target at a time; the
/// engine enforces that against the live endpoint, this type enforces the
/// phase ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    phase: SessionPhase,
    mode: Option<SessionMode>,
    cursor: String,
    dirty: bool,
    changes: Vec<ChangeRecord>,
}

impl SessionState {
    /// A closed session with the cursor at the configuration root.
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Closed,
            mode: None,
            cursor: "/".to_string(),
            dirty: false,
            changes: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.phase == SessionPhase::Open
    }

    pub fn has_pending_changes(&self) -> bool {
        self.dirty
    }

    /// Current navigation cursor (always an absolute path).
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    /// Begin opening a session. Only legal from `Closed`.
    pub fn begin(&mut self, mode: SessionMode) -> Result<(), InvalidSessionTransition> {
        if self.phase != SessionPhase::Closed {
            return Err(InvalidSessionTransition {
                from: self.phase,
                operation: "begin",
            });
        }
        self.phase = SessionPhase::Opening;
        self.mode = Some(mode);
        self.cursor = "/".to_string();
        self.dirty = false;
        self.changes.clear();
        Ok(())
    }

    /// Mark the session open. Only legal from `Opening`.
    pub fn opened(&mut self) -> Result<(), InvalidSessionTransition> {
        if self.phase != SessionPhase::Opening {
            return Err(InvalidSessionTransition {
                from: self.phase,
                operation: "opened",
            });
        }
        self.phase = SessionPhase::Open;
        Ok(())
    }

    /// Move the navigation cursor. Only legal while `Open`.
    ///
    /// Returns the resolved absolute path.
    pub fn navigate(&mut self, path: &str) -> Result<String, InvalidSessionTransition> {
        if self.phase != SessionPhase::Open {
            return Err(InvalidSessionTransition {
                from: self.phase,
                operation: "navigate",
            });
        }
        let resolved = resolve_path(&self.cursor, path);
        self.cursor = resolved.clone();
        Ok(resolved)
    }

    /// Record a mutation at `path` (resolved against the cursor). Only legal
    /// while `Open`. Returns the resolved absolute path the mutation applies
    /// to.
    pub fn record_change(
        &mut self,
        path: &str,
        attribute: &str,
    ) -> Result<String, InvalidSessionTransition> {
        if self.phase != SessionPhase::Open {
            return Err(InvalidSessionTransition {
                from: self.phase,
                operation: "set",
            });
        }
        let resolved = resolve_path(&self.cursor, path);
        self.changes.push(ChangeRecord {
            path: resolved.clone(),
            attribute: attribute.to_string(),
        });
        self.dirty = true;
        Ok(resolved)
    }

    /// Begin committing. Only legal from `Open`.
    pub fn begin_commit(&mut self) -> Result<(), InvalidSessionTransition> {
        if self.phase != SessionPhase::Open {
            return Err(InvalidSessionTransition {
                from: self.phase,
                operation: "commit",
            });
        }
        self.phase = SessionPhase::Committing;
        Ok(())
    }

    /// Close the session from any phase, producing the receipt for the
    /// transaction that just ended.
    pub fn close(&mut self) -> CommitReceipt {
        let receipt = CommitReceipt {
            mode: self.mode.unwrap_or(SessionMode::OfflineTemplate),
            requires_restart: self.requires_restart(),
            changes_applied: self.changes.len(),
        };
        self.phase = SessionPhase::Closed;
        self.mode = None;
        self.cursor = "/".to_string();
        self.dirty = false;
        self.changes.clear();
        receipt
    }

    /// Whether the recorded change set only takes effect after a restart.
    pub fn requires_restart(&self) -> bool {
        self.changes.iter().any(change_requires_restart)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Committing => "committing",
        };
        f.write_str(s)
    }
}

fn change_requires_restart(change: &ChangeRecord) -> bool {
    if RESTART_ATTRIBUTES.contains(&change.attribute.as_str()) {
        return true;
    }
    change.path.split('/').any(|segment| segment == "SSL")
}

/// Resolve `path` against `cursor`: absolute paths replace the cursor,
/// relative paths join it. `.` and `..` segments are folded.
pub fn resolve_path(cursor: &str, path: &str) -> String {
    let mut segments: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        cursor.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}
