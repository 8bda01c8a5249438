//! Host configuration.
//!
//! Configuration is loaded from `~/.meridian/host.toml`. Every section is
//! optional and falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use meridian_telemetry::LogConfig;

use crate::elicitation::ElicitationConfig;
use crate::error::{McpError, McpResult};
use crate::registry::RegistryOptions;
use crate::roots::RootsConfig;
use crate::sampling::SamplingConfig;

/// Policy for reconnecting a server after it failed or died.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Never reconnect automatically (default).
    #[default]
    Never,
    /// Reconnect on failure, up to `max_retries` times.
    OnFailure {
        /// Maximum number of reconnect attempts.
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    /// Always reconnect (no retry limit).
    Always,
}

fn default_max_retries() -> u32 {
    3
}

impl RestartPolicy {
    /// Whether another attempt is allowed after `attempts` reconnects.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        match self {
            Self::Never => false,
            Self::OnFailure { max_retries } => attempts < *max_retries,
            Self::Always => true,
        }
    }
}

/// Immutable launch descriptor for one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name (unique key).
    #[serde(skip)]
    pub name: String,
    /// Command to launch.
    pub command: String,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overlay applied on top of the host environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Whether sampling requests from this server bypass approval.
    #[serde(default)]
    pub trusted: bool,
    /// Description for users.
    pub description: Option<String>,
    /// Reconnect policy.
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

impl ServerConfig {
    /// Create a stdio server config.
    #[must_use]
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            trusted: false,
            description: None,
            restart_policy: RestartPolicy::Never,
        }
    }

    /// Mark this server as trusted.
    #[must_use]
    pub fn trusted(mut self) -> Self {
        self.trusted = true;
        self
    }

    /// Set arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set restart policy.
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }
}

/// Connection-level settings shared by every server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Default per-call deadline, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Deadline for a graceful session close, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ConnectionSettings {
    /// Default per-call deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Graceful close deadline.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Complete host configuration (`host.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Explicitly configured servers, keyed by name.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Known-server discovery options.
    #[serde(default)]
    pub registry: RegistryOptions,
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Sampling settings.
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Elicitation settings.
    #[serde(default)]
    pub elicitation: ElicitationConfig,
    /// Roots settings.
    #[serde(default)]
    pub roots: RootsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LogConfig,
}

impl HostConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(content: &str) -> McpResult<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| McpError::ConfigError(format!("Invalid config: {e}")))?;

        for (name, server) in &mut config.servers {
            server.name.clone_from(name);
        }

        Ok(config)
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> McpResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from the default location, or defaults if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined or the
    /// file exists but cannot be read.
    pub fn load_default() -> McpResult<Self> {
        let path = Self::default_path()?;

        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the default config path (`~/.meridian/host.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn default_path() -> McpResult<PathBuf> {
        let dirs = directories::BaseDirs::new().ok_or_else(|| {
            McpError::ConfigError("Cannot determine home directory".to_string())
        })?;
        Ok(dirs.home_dir().join(".meridian").join("host.toml"))
    }

    /// Save configuration to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialized.
    pub fn save(&self, path: impl AsRef<Path>) -> McpResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| McpError::SerializationError(e.to_string()))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Add a server config.
    pub fn add_server(&mut self, config: ServerConfig) {
        self.servers.insert(config.name.clone(), config);
    }

    /// Check the configuration for values that can never work.
    ///
    /// # Errors
    ///
    /// Returns a [`McpError::ConfigError`] describing every problem found.
    pub fn validate(&self) -> McpResult<()> {
        let mut problems = Vec::new();

        for (name, server) in &self.servers {
            if server.command.trim().is_empty() {
                problems.push(format!("server {name}: command is empty"));
            }
        }
        if self.connection.request_timeout_secs == 0 {
            problems.push("connection.request_timeout_secs must be positive".to_string());
        }
        if self.sampling.timeout_secs == 0 {
            problems.push("sampling.timeout_secs must be positive".to_string());
        }
        if self.sampling.inference_tool.trim().is_empty() {
            problems.push("sampling.inference_tool is empty".to_string());
        }
        if self.elicitation.response_timeout_secs == 0 {
            problems.push("elicitation.response_timeout_secs must be positive".to_string());
        }
        if self.roots.max_walk_depth == 0 && self.roots.detect_workspace {
            problems.push("roots.max_walk_depth must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(McpError::ConfigError(problems.join("; ")))
        }
    }
}
