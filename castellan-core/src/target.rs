//! Administration endpoint identity and domain path composition.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Connection scheme for the administration endpoint.
///
/// The scheme is an opaque part of the endpoint URL: nothing in the core
/// branches on it beyond formatting, so transports decide what each scheme
/// means on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    T3,
    T3s,
    Http,
    Iiop,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::T3 => "t3",
            Self::T3s => "t3s",
            Self::Http => "http",
            Self::Iiop => "iiop",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown scheme string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connection scheme: {0}")]
pub struct UnknownScheme(pub String);

impl FromStr for Scheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t3" => Ok(Self::T3),
            "t3s" => Ok(Self::T3s),
            "http" => Ok(Self::Http),
            "iiop" => Ok(Self::Iiop),
            other => Err(UnknownScheme(other.to_string())),
        }
    }
}

/// Identity of one administration endpoint and its domain on disk.
///
/// Immutable once a workflow starts: every component receives it by
/// reference and none retains it past workflow completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTarget {
    /// Connection scheme for the administration endpoint.
    pub scheme: Scheme,
    /// Hostname or address of the admin server.
    pub host: String,
    /// Listen port of the admin server.
    pub port: u16,
    /// Name of the domain.
    pub domain_name: String,
    /// Filesystem root under which domains live.
    pub domains_root: PathBuf,
}

impl DomainTarget {
    pub fn new(
        scheme: Scheme,
        host: impl Into<String>,
        port: u16,
        domain_name: impl Into<String>,
        domains_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            domain_name: domain_name.into(),
            domains_root: domains_root.into(),
        }
    }

    /// The administration URL, e.g. `t3://localhost:7001`.
    pub fn admin_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// The domain's filesystem directory: `<domains_root>/<domain_name>`.
    pub fn domain_dir(&self) -> PathBuf {
        self.domains_root.join(&self.domain_name)
    }

    /// A server's security directory inside the domain:
    /// `<domains_root>/<domain_name>/servers/<server>/security`.
    pub fn server_security_dir(&self, server_name: &str) -> PathBuf {
        self.domain_dir()
            .join("servers")
            .join(server_name)
            .join("security")
    }
}
