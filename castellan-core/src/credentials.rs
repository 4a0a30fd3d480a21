//! Administrative credentials with proper secret handling.
//!
//! Passwords are zeroized on drop, never appear in Debug output, and are
//! compared in constant time. Separate pairs exist for the admin console,
//! the node agent, and each keystore; the orchestrator owns them and passes
//! them by reference for the duration of a workflow.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A password held only in memory for the workflow's duration.
///
/// # Security
///
/// - Zeroized on drop so the secret does not linger in memory
/// - `Debug` prints a redaction marker, never the value
/// - Equality uses constant-time comparison
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Access the raw secret.
    ///
    /// The returned reference should not be stored; copying the value
    /// defeats zeroization. Intended for the single point where the secret
    /// crosses to an external interface (a remote call argument or a tool
    /// command line).
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for Password {}

impl From<&str> for Password {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

/// A username/password pair for one external endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Password,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<Password>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check a presented pair against this one.
    ///
    /// The password comparison is constant-time.
    #[must_use]
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username == username;
        let pass_ok: bool = self
            .password
            .expose()
            .as_bytes()
            .ct_eq(password.as_bytes())
            .into();
        user_ok && pass_ok
    }
}

impl From<String> for Password {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}
