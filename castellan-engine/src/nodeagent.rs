//! Node agent configuration artifacts.
//!
//! The agent endpoint describes its own listen configuration, log handling,
//! and behavior flags through a properties file in its home directory, plus
//! a domains file mapping enrolled domain names to their directories. The
//! core generates these artifacts; it never parses them back.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Properties file name inside the agent home.
const PROPERTIES_FILE: &str = "nodeagent.properties";
/// Domains file name inside the agent home.
const DOMAINS_FILE: &str = "nodeagent.domains";

/// Listen configuration and behavior flags for one node agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAgentConfig {
    /// Agent home directory; receives the generated files.
    pub home: PathBuf,
    /// Java installation the agent runs under.
    pub java_home: PathBuf,
    /// Listen address; empty means all interfaces.
    pub listen_address: String,
    pub listen_port: u16,
    pub listen_backlog: u32,
    pub log_file: PathBuf,
    pub log_level: String,
    pub log_limit: u32,
    pub log_count: u32,
    pub log_append: bool,
    pub log_to_stderr: bool,
    /// Whether connecting clients must authenticate.
    pub authentication_enabled: bool,
    /// Restart managed servers that crashed while the agent was down.
    pub crash_recovery_enabled: bool,
    pub start_script_enabled: bool,
    pub start_script_name: String,
    pub stop_script_enabled: bool,
    pub quit_enabled: bool,
    pub secure_listener: bool,
    /// Interval between managed-process state checks, in milliseconds.
    pub state_check_interval_ms: u32,
    pub domains_file_enabled: bool,
}

impl NodeAgentConfig {
    /// Defaults matching a locally supervised agent: authenticated plain
    /// listener on port 5556, crash recovery on, start scripts on.
    pub fn new(
        home: impl Into<PathBuf>,
        java_home: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            home: home.into(),
            java_home: java_home.into(),
            listen_address: String::new(),
            listen_port: 5556,
            listen_backlog: 50,
            log_file: log_file.into(),
            log_level: "INFO".to_string(),
            log_limit: 0,
            log_count: 1,
            log_append: true,
            log_to_stderr: true,
            authentication_enabled: true,
            crash_recovery_enabled: true,
            start_script_enabled: true,
            start_script_name: "start-server.sh".to_string(),
            stop_script_enabled: false,
            quit_enabled: false,
            secure_listener: false,
            state_check_interval_ms: 500,
            domains_file_enabled: true,
        }
    }

    /// Path of the generated properties file.
    pub fn properties_path(&self) -> PathBuf {
        self.home.join(PROPERTIES_FILE)
    }

    /// Path of the generated domains file.
    pub fn domains_path(&self) -> PathBuf {
        self.home.join(DOMAINS_FILE)
    }

    /// Write the agent properties file, replacing any existing one.
    ///
    /// Returns the path written.
    pub fn write_properties(&self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.home)?;
        let path = self.properties_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }

        let mut content = String::new();
        let _ = writeln!(content, "# Generated by castellan at: {}", Utc::now().to_rfc3339());
        let _ = writeln!(content);
        let _ = writeln!(content, "PropertiesVersion=1.0");
        let _ = writeln!(content, "DomainsFile={}", self.domains_path().display());
        let _ = writeln!(content, "DomainsFileEnabled={}", self.domains_file_enabled);
        let _ = writeln!(content, "JavaHome={}", self.java_home.display());
        let _ = writeln!(content, "NodeAgentHome={}", self.home.display());
        let _ = writeln!(content, "ListenAddress={}", self.listen_address);
        let _ = writeln!(content, "ListenPort={}", self.listen_port);
        let _ = writeln!(content, "ListenBacklog={}", self.listen_backlog);
        let _ = writeln!(content, "SecureListener={}", self.secure_listener);
        let _ = writeln!(content, "AuthenticationEnabled={}", self.authentication_enabled);
        let _ = writeln!(content, "CrashRecoveryEnabled={}", self.crash_recovery_enabled);
        let _ = writeln!(content, "StateCheckInterval={}", self.state_check_interval_ms);
        let _ = writeln!(content, "StartScriptEnabled={}", self.start_script_enabled);
        let _ = writeln!(content, "StartScriptName={}", self.start_script_name);
        let _ = writeln!(content, "StopScriptEnabled={}", self.stop_script_enabled);
        let _ = writeln!(content, "QuitEnabled={}", self.quit_enabled);
        let _ = writeln!(content, "LogFile={}", self.log_file.display());
        let _ = writeln!(content, "LogLevel={}", self.log_level);
        let _ = writeln!(content, "LogLimit={}", self.log_limit);
        let _ = writeln!(content, "LogCount={}", self.log_count);
        let _ = writeln!(content, "LogAppend={}", self.log_append);
        let _ = writeln!(content, "LogToStderr={}", self.log_to_stderr);

        fs::write(&path, content)?;
        tracing::info!(path = %path.display(), "wrote node agent properties");
        Ok(path)
    }

    /// Write the agent domains file mapping domain names to directories,
    /// replacing any existing one.
    pub fn write_domains_file(&self, entries: &[(String, PathBuf)]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.home)?;
        let path = self.domains_path();

        let mut content = String::new();
        let _ = writeln!(content, "# Generated by castellan at: {}", Utc::now().to_rfc3339());
        for (name, dir) in entries {
            let _ = writeln!(content, "{}={}", name, dir.display());
        }

        fs::write(&path, content)?;
        tracing::info!(path = %path.display(), domains = entries.len(), "wrote node agent domains file");
        Ok(path)
    }
}
