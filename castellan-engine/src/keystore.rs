//! Keystore provisioning pipeline.
//!
//! A strictly ordered chain of invocations of an external keytool-compatible
//! binary: generate a key pair into a scratch identity store, self-sign it,
//! export the certificate, import it into a new trust store, move both
//! stores into the domain's per-server security directory, and delete the
//! scratch certificate. Each step depends on the file produced by the
//! previous one; the pipeline waits for each child process to exit before
//! proceeding and aborts the chain on the first failure.
//!
//! A failed run reports [`PartialProvisioning`] carrying the last step that
//! completed. Partial artifacts are left in place for the caller to decide
//! between retry-from-scratch and manual cleanup.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use castellan_core::keystore::{
    certificate_name, identity_store_name, trust_store_name, KeystoreArtifact, KeystoreKind,
    PipelineStep,
};
use castellan_core::{DomainTarget, Password};

/// Parameters for one provisioning run.
#[derive(Debug, Clone)]
pub struct KeystoreRequest {
    /// Server whose security directory receives the stores.
    pub server_name: String,
    /// Key pair alias inside the stores.
    pub alias: String,
    /// X.500 distinguished name for the generated certificate.
    pub distinguished_name: String,
    /// RSA key size in bits.
    pub key_size: u32,
    /// Certificate validity period in days.
    pub validity_days: u32,
    /// Password protecting both stores.
    pub store_password: Password,
    /// Password protecting the private key.
    pub key_password: Password,
}

impl KeystoreRequest {
    /// A request with the conventional key size (2048) and validity
    /// (3650 days).
    pub fn new(
        server_name: impl Into<String>,
        alias: impl Into<String>,
        distinguished_name: impl Into<String>,
        store_password: Password,
        key_password: Password,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            alias: alias.into(),
            distinguished_name: distinguished_name.into(),
            key_size: 2048,
            validity_days: 3650,
            store_password,
            key_password,
        }
    }
}

/// Result of a completed provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// The two deployed stores (identity, trust) at their destination
    /// paths.
    pub artifacts: Vec<KeystoreArtifact>,
}

/// One step's failure cause.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StepError {
    /// The key tool exited with a non-zero status.
    #[error("key tool exited with status {code:?} during '{step}': {stderr}")]
    ToolInvocation {
        step: PipelineStep,
        code: Option<i32>,
        stderr: String,
    },

    /// The key tool could not be launched at all.
    #[error("failed to launch key tool '{tool}' for '{step}': {source}")]
    ToolLaunch {
        step: PipelineStep,
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A filesystem operation failed.
    #[error("filesystem operation on '{path}' failed during '{step}': {source}")]
    Io {
        step: PipelineStep,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An aborted provisioning run.
///
/// `last_completed` is `None` when the very first step failed. No automatic
/// cleanup has happened: whatever the completed steps produced is still on
/// disk, exactly as the step names imply.
#[derive(Debug, thiserror::Error)]
#[error(
    "keystore provisioning aborted {}: {cause}",
    last_completed.map(|s| format!("after step '{s}'")).unwrap_or_else(|| "before any step completed".to_string())
)]
pub struct PartialProvisioning {
    pub last_completed: Option<PipelineStep>,
    #[source]
    pub cause: StepError,
}

/// Sequential external-tool invocation chain producing identity and trust
/// stores.
pub struct KeystorePipeline {
    tool: PathBuf,
    scratch_dir: PathBuf,
}

impl KeystorePipeline {
    pub fn new(tool: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Locate the key tool relative to a Java installation
    /// (`<java_home>/bin/keytool`).
    pub fn from_java_home(java_home: &Path, scratch_dir: impl Into<PathBuf>) -> Self {
        Self::new(java_home.join("bin").join("keytool"), scratch_dir)
    }

    /// Run the pipeline to completion for `request`, deploying into
    /// `target`'s security directory for the request's server.
    pub fn provision(
        &self,
        target: &DomainTarget,
        request: &KeystoreRequest,
    ) -> Result<ProvisionReport, PartialProvisioning> {
        let identity_scratch = self.scratch_dir.join(identity_store_name(&request.alias));
        let trust_scratch = self.scratch_dir.join(trust_store_name(&request.alias));
        let certificate_scratch = self.scratch_dir.join(certificate_name(&request.alias));
        let security_dir = target.server_security_dir(&request.server_name);

        tracing::info!(
            alias = %request.alias,
            destination = %security_dir.display(),
            "provisioning keystores"
        );

        let mut last_completed = None;
        let mut step = |step: PipelineStep, result: Result<(), StepError>| match result {
            Ok(()) => {
                tracing::debug!(step = %step, "pipeline step completed");
                last_completed = Some(step);
                Ok(())
            }
            Err(cause) => Err(PartialProvisioning {
                last_completed,
                cause,
            }),
        };

        step(
            PipelineStep::Genkey,
            self.run_tool(
                PipelineStep::Genkey,
                [
                    os("-genkey"),
                    os("-alias"),
                    os(&request.alias),
                    os("-keyalg"),
                    os("RSA"),
                    os("-keysize"),
                    os(request.key_size.to_string()),
                    os("-validity"),
                    os(request.validity_days.to_string()),
                    os("-keypass"),
                    os(request.key_password.expose()),
                    os("-keystore"),
                    identity_scratch.clone().into(),
                    os("-storepass"),
                    os(request.store_password.expose()),
                    os("-dname"),
                    os(&request.distinguished_name),
                ],
            ),
        )?;

        step(
            PipelineStep::Selfsign,
            self.run_tool(
                PipelineStep::Selfsign,
                [
                    os("-selfcert"),
                    os("-alias"),
                    os(&request.alias),
                    os("-dname"),
                    os(&request.distinguished_name),
                    os("-keypass"),
                    os(request.key_password.expose()),
                    os("-keystore"),
                    identity_scratch.clone().into(),
                    os("-storepass"),
                    os(request.store_password.expose()),
                ],
            ),
        )?;

        step(
            PipelineStep::Export,
            self.run_tool(
                PipelineStep::Export,
                [
                    os("-export"),
                    os("-alias"),
                    os(&request.alias),
                    os("-file"),
                    certificate_scratch.clone().into(),
                    os("-keystore"),
                    identity_scratch.clone().into(),
                    os("-storepass"),
                    os(request.store_password.expose()),
                ],
            ),
        )?;

        step(
            PipelineStep::Import,
            self.run_tool(
                PipelineStep::Import,
                [
                    os("-import"),
                    os("-alias"),
                    os(&request.alias),
                    os("-file"),
                    certificate_scratch.clone().into(),
                    os("-keystore"),
                    trust_scratch.clone().into(),
                    os("-storepass"),
                    os(request.store_password.expose()),
                    os("-noprompt"),
                ],
            ),
        )?;

        let identity_dest = security_dir.join(identity_store_name(&request.alias));
        let trust_dest = security_dir.join(trust_store_name(&request.alias));
        step(
            PipelineStep::Deploy,
            deploy(
                &security_dir,
                &[
                    (identity_scratch.as_path(), identity_dest.as_path()),
                    (trust_scratch.as_path(), trust_dest.as_path()),
                ],
            ),
        )?;

        step(
            PipelineStep::Cleanup,
            fs::remove_file(&certificate_scratch).map_err(|source| StepError::Io {
                step: PipelineStep::Cleanup,
                path: certificate_scratch.clone(),
                source,
            }),
        )?;

        tracing::info!(alias = %request.alias, "keystore provisioning complete");
        Ok(ProvisionReport {
            artifacts: vec![
                KeystoreArtifact {
                    alias: request.alias.clone(),
                    kind: KeystoreKind::Identity,
                    path: identity_dest,
                    password_ref: "store_password".to_string(),
                },
                KeystoreArtifact {
                    alias: request.alias.clone(),
                    kind: KeystoreKind::Trust,
                    path: trust_dest,
                    password_ref: "store_password".to_string(),
                },
            ],
        })
    }

    fn run_tool(
        &self,
        step: PipelineStep,
        args: impl IntoIterator<Item = OsString>,
    ) -> Result<(), StepError> {
        // Arguments carry store passwords; only the step name is logged.
        tracing::debug!(step = %step, tool = %self.tool.display(), "invoking key tool");

        let output = Command::new(&self.tool)
            .args(args)
            .output()
            .map_err(|source| StepError::ToolLaunch {
                step,
                tool: self.tool.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(StepError::ToolInvocation {
                step,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

fn os(value: impl Into<OsString>) -> OsString {
    value.into()
}

/// Move each scratch store to its destination, overwriting existing files.
///
/// Delete-then-move: an identity artifact already present at the
/// destination is replaced, never merged. Falls back to copy+remove when
/// the scratch and destination trees sit on different filesystems; either
/// way the scratch copy is gone afterwards.
fn deploy(security_dir: &Path, moves: &[(&Path, &Path)]) -> Result<(), StepError> {
    let io_err = |path: &Path, source| StepError::Io {
        step: PipelineStep::Deploy,
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(security_dir).map_err(|e| io_err(security_dir, e))?;

    for (source, dest) in moves {
        if dest.exists() {
            fs::remove_file(dest).map_err(|e| io_err(dest, e))?;
        }
        if fs::rename(source, dest).is_err() {
            fs::copy(source, dest).map_err(|e| io_err(dest, e))?;
            fs::remove_file(source).map_err(|e| io_err(source, e))?;
        }
        tracing::debug!(from = %source.display(), to = %dest.display(), "deployed keystore");
    }
    Ok(())
}
