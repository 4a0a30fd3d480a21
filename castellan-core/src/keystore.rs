//! Keystore artifact model and provisioning pipeline steps.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Role of a keystore file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeystoreKind {
    /// Holds the private key and its certificate chain.
    Identity,
    /// Holds trusted certificates.
    Trust,
}

/// A provisioned keystore file.
///
/// `password_ref` is a label naming which credential opens the store; the
/// secret itself never appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreArtifact {
    pub alias: String,
    pub kind: KeystoreKind,
    pub path: PathBuf,
    pub password_ref: String,
}

/// Steps of the keystore provisioning pipeline, in execution order.
///
/// Each step depends on the file produced by the previous one; a failed step
/// aborts everything after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Generate a key pair into a new scratch identity store.
    Genkey,
    /// Self-sign the certificate in place.
    Selfsign,
    /// Export the public certificate to a standalone file.
    Export,
    /// Create the trust store and import the exported certificate.
    Import,
    /// Move both stores into the server security directory.
    Deploy,
    /// Delete the scratch certificate file.
    Cleanup,
}

impl PipelineStep {
    /// All steps in execution order.
    pub const ALL: [PipelineStep; 6] = [
        Self::Genkey,
        Self::Selfsign,
        Self::Export,
        Self::Import,
        Self::Deploy,
        Self::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Genkey => "genkey",
            Self::Selfsign => "selfsign",
            Self::Export => "export",
            Self::Import => "import",
            Self::Deploy => "deploy",
            Self::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// File name of an identity store for `alias`.
pub fn identity_store_name(alias: &str) -> String {
    format!("{alias}_identity.jks")
}

/// File name of a trust store for `alias`.
pub fn trust_store_name(alias: &str) -> String {
    format!("{alias}_trust.jks")
}

/// File name of the exported certificate for `alias`.
pub fn certificate_name(alias: &str) -> String {
    format!("{alias}_cert.cer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_order_and_names() {
        let names: Vec<&str> = PipelineStep::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["genkey", "selfsign", "export", "import", "deploy", "cleanup"]
        );
    }

    #[test]
    fn file_name_conventions() {
        assert_eq!(identity_store_name("AdminServer"), "AdminServer_identity.jks");
        assert_eq!(trust_store_name("AdminServer"), "AdminServer_trust.jks");
        assert_eq!(certificate_name("AdminServer"), "AdminServer_cert.cer");
    }

    #[test]
    fn kind_snake_case() {
        assert_eq!(
            serde_json::to_string(&KeystoreKind::Identity).unwrap(),
            r#""identity""#
        );
        assert_eq!(
            serde_json::to_string(&KeystoreKind::Trust).unwrap(),
            r#""trust""#
        );
    }
}
