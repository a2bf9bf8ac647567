//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Configurable timeout values (seconds) for every bounded wait.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Launch, handshake and initial-pause wait; also bounds daemon readiness.
    #[serde(default = "default_launch_seconds")]
    pub launch_seconds: u64,
    /// Wait for a pause or termination after `resume` / `step`.
    #[serde(default = "default_resume_seconds")]
    pub resume_seconds: u64,
    /// Single request/response round-trip with the runtime.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Grace period before a debuggee is force-killed on teardown.
    #[serde(default = "default_disconnect_seconds")]
    pub disconnect_seconds: u64,
    /// How long a caller waits for a daemon reply.
    #[serde(default = "default_daemon_command_seconds")]
    pub daemon_command_seconds: u64,
}

fn default_launch_seconds() -> u64 {
    10
}

fn default_resume_seconds() -> u64 {
    30
}

fn default_request_seconds() -> u64 {
    10
}

fn default_disconnect_seconds() -> u64 {
    3
}

fn default_daemon_command_seconds() -> u64 {
    120
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            launch_seconds: default_launch_seconds(),
            resume_seconds: default_resume_seconds(),
            request_seconds: default_request_seconds(),
            disconnect_seconds: default_disconnect_seconds(),
            daemon_command_seconds: default_daemon_command_seconds(),
        }
    }
}

impl TimeoutConfig {
    /// Launch / initial pause bound.
    #[must_use]
    pub fn launch(&self) -> Duration {
        Duration::from_secs(self.launch_seconds)
    }

    /// Post-resume pause/termination bound.
    #[must_use]
    pub fn resume(&self) -> Duration {
        Duration::from_secs(self.resume_seconds)
    }

    /// Per-request bound.
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_seconds)
    }

    /// Teardown grace period.
    #[must_use]
    pub fn disconnect(&self) -> Duration {
        Duration::from_secs(self.disconnect_seconds)
    }

    /// Daemon reply bound.
    #[must_use]
    pub fn daemon_command(&self) -> Duration {
        Duration::from_secs(self.daemon_command_seconds)
    }
}

/// Settings for the inspector-style (Node.js) runtime.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InspectorConfig {
    /// `node` executable.
    #[serde(default = "default_node_path")]
    pub node_path: String,
    /// Extra arguments placed before `--inspect-brk`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_node_path() -> String {
    "node".into()
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            node_path: default_node_path(),
            extra_args: Vec::new(),
        }
    }
}

/// Settings for the adapter-style (Python / debugpy) runtime.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfig {
    /// Python interpreter that hosts the adapter.
    #[serde(default = "default_python_path")]
    pub python_path: String,
    /// Module run with `-m` to start the adapter.
    #[serde(default = "default_adapter_module")]
    pub adapter_module: String,
    /// Restrict stepping to user code.
    #[serde(default = "default_true")]
    pub just_my_code: bool,
}

fn default_python_path() -> String {
    "python3".into()
}

fn default_adapter_module() -> String {
    "debugpy.adapter".into()
}

fn default_true() -> bool {
    true
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            python_path: default_python_path(),
            adapter_module: default_adapter_module(),
            just_my_code: true,
        }
    }
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".debug_session.json")
}

/// Global configuration parsed from an optional TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DebugConfig {
    /// Location of the persisted session record.
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    /// Bounded-wait configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Inspector-style runtime settings.
    #[serde(default)]
    pub inspector: InspectorConfig,
    /// Adapter-style runtime settings.
    #[serde(default)]
    pub adapter: AdapterConfig,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
            timeouts: TimeoutConfig::default(),
            inspector: InspectorConfig::default(),
            adapter: AdapterConfig::default(),
        }
    }
}

impl DebugConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the daemon log file that sits beside the session record.
    #[must_use]
    pub fn daemon_log_path(&self) -> PathBuf {
        let mut name = self
            .session_file
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".log");
        self.session_file.with_file_name(name)
    }

    fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        for (name, value) in [
            ("launch_seconds", t.launch_seconds),
            ("resume_seconds", t.resume_seconds),
            ("request_seconds", t.request_seconds),
            ("disconnect_seconds", t.disconnect_seconds),
            ("daemon_command_seconds", t.daemon_command_seconds),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "timeouts.{name} must be greater than zero"
                )));
            }
        }

        if t.daemon_command_seconds <= t.resume_seconds {
            return Err(AppError::Config(
                "timeouts.daemon_command_seconds must exceed timeouts.resume_seconds".into(),
            ));
        }

        if self.session_file.as_os_str().is_empty() {
            return Err(AppError::Config("session_file must not be empty".into()));
        }

        Ok(())
    }
}
