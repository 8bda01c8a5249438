//! Known-server registry.
//!
//! Pure functions that build [`ServerConfig`] launch descriptors. The only
//! side effect is the existence check in [`command_available`], used to
//! decide whether a known server joins the default set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ServerConfig;

/// Name of the built-in inference server.
pub const INFERENCE_SERVER: &str = "inference";
/// Name of the built-in filesystem server.
pub const FILESYSTEM_SERVER: &str = "filesystem";
/// Name of the built-in memory server.
pub const MEMORY_SERVER: &str = "memory";

/// Options controlling which known servers are offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOptions {
    /// Offer known servers whose command is available.
    #[serde(default = "default_true")]
    pub include_known: bool,
    /// Command launching the inference server.
    #[serde(default = "default_inference_command")]
    pub inference_command: String,
    /// Arguments for the inference server.
    #[serde(default = "default_inference_args")]
    pub inference_args: Vec<String>,
    /// Directory exposed by the filesystem server; omitted when unset.
    pub filesystem_root: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_inference_command() -> String {
    "meridian-inference".to_string()
}

fn default_inference_args() -> Vec<String> {
    vec!["--stdio".to_string()]
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            include_known: true,
            inference_command: default_inference_command(),
            inference_args: default_inference_args(),
            filesystem_root: None,
        }
    }
}

/// Build a descriptor for an arbitrary server.
#[must_use]
pub fn custom_server(
    name: impl Into<String>,
    command: impl Into<String>,
    args: impl IntoIterator<Item = impl Into<String>>,
    env: Option<HashMap<String, String>>,
    trusted: bool,
) -> ServerConfig {
    let mut config = ServerConfig::stdio(name, command).with_args(args);
    if let Some(env) = env {
        config.env = env;
    }
    config.trusted = trusted;
    config
}

/// The inference server. Trusted, since sampling is fulfilled by it.
#[must_use]
pub fn inference_server(options: &RegistryOptions) -> ServerConfig {
    ServerConfig::stdio(INFERENCE_SERVER, options.inference_command.clone())
        .with_args(options.inference_args.iter().cloned())
        .with_description("Model inference for sampling requests")
        .trusted()
}

/// The reference filesystem server, scoped to `root`.
#[must_use]
pub fn filesystem_server(root: &Path) -> ServerConfig {
    ServerConfig::stdio(FILESYSTEM_SERVER, "npx")
        .with_args([
            "-y".to_string(),
            "@modelcontextprotocol/server-filesystem".to_string(),
            root.display().to_string(),
        ])
        .with_description(format!("File access under {}", root.display()))
}

/// The reference knowledge-graph memory server.
#[must_use]
pub fn memory_server() -> ServerConfig {
    ServerConfig::stdio(MEMORY_SERVER, "npx")
        .with_args(["-y", "@modelcontextprotocol/server-memory"])
        .with_description("Persistent knowledge graph memory")
}

/// Whether `command` can be launched.
///
/// Commands containing a path separator must exist on disk; bare names are
/// resolved on `PATH`.
#[must_use]
pub fn command_available(command: &str) -> bool {
    if command.trim().is_empty() {
        return false;
    }

    let path = Path::new(command);
    if path.components().count() > 1 || path.is_absolute() {
        path.is_file()
    } else {
        which::which(command).is_ok()
    }
}

/// Known servers, before availability filtering.
#[must_use]
pub fn known_servers(options: &RegistryOptions) -> Vec<ServerConfig> {
    let mut servers = vec![inference_server(options), memory_server()];
    if let Some(root) = &options.filesystem_root {
        servers.push(filesystem_server(root));
    }
    servers
}

/// The server set a host session connects to.
///
/// Explicitly configured servers are always included. Known servers are
/// added when enabled and launchable, unless a configured server already
/// uses their name. The result is ordered by name.
#[must_use]
pub fn default_servers(
    options: &RegistryOptions,
    configured: &BTreeMap<String, ServerConfig>,
) -> Vec<ServerConfig> {
    let mut selected: BTreeMap<String, ServerConfig> = configured.clone();

    if options.include_known {
        for server in known_servers(options) {
            if selected.contains_key(&server.name) {
                continue;
            }
            if command_available(&server.command) {
                selected.insert(server.name.clone(), server);
            } else {
                debug!(
                    server = %server.name,
                    command = %server.command,
                    "Known server command not found; skipping"
                );
            }
        }
    }

    selected.into_values().collect()
}
