//! The host façade.
//!
//! [`Orchestrator`] wires the registry, connection manager, roots manager and
//! the sampling and elicitation handlers together. Other subsystems talk to
//! the host only through it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::approval::ApprovalSource;
use crate::capabilities::HostCapabilities;
use crate::config::{HostConfig, ServerConfig};
use crate::elicitation::{
    ElicitationHandler, ElicitationRequest, ElicitationResponse, ElicitationSchema, InputSource,
};
use crate::error::McpResult;
use crate::registry;
use crate::roots::{Root, RootsManager, RootsSubscription};
use crate::sampling::{SamplingHandler, SamplingRequest, SamplingResponse, ToolCaller};
use crate::server::{ConnectionState, ServerConnectionManager, ServerStatus};
use crate::transport::ServerLauncher;
use crate::types::{
    PromptContent, PromptDefinition, ResourceContent, ResourceDefinition, ToolDefinition,
    ToolResult,
};

/// Outcome of [`Orchestrator::initialize`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeReport {
    /// Servers connected by this call, sorted.
    pub connected: Vec<String>,
    /// Servers that failed to connect, with the reason.
    pub failed: Vec<(String, String)>,
    /// Roots computed for the session.
    pub roots: Vec<Root>,
    /// Servers that received the roots broadcast.
    pub roots_notified: usize,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: HostConfig,
    approval: Option<Arc<dyn ApprovalSource>>,
    input: Option<Arc<dyn InputSource>>,
    launcher: Option<Arc<dyn ServerLauncher>>,
    cwd: Option<PathBuf>,
    home: Option<PathBuf>,
}

impl OrchestratorBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            approval: None,
            input: None,
            launcher: None,
            cwd: None,
            home: None,
        }
    }

    /// Gate sampling through `approval` instead of auto-approving.
    #[must_use]
    pub fn approval_source(mut self, approval: Arc<dyn ApprovalSource>) -> Self {
        self.approval = Some(approval);
        self
    }

    /// Collect elicitation data from `input` instead of synthesizing it.
    #[must_use]
    pub fn input_source(mut self, input: Arc<dyn InputSource>) -> Self {
        self.input = Some(input);
        self
    }

    /// Launch servers through `launcher`.
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn ServerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Discover roots from `cwd` instead of the process working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Use `home` as the home directory root.
    #[must_use]
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Validate the configuration and wire the components.
    ///
    /// # Errors
    ///
    /// Returns a [`McpError::ConfigError`](crate::McpError::ConfigError) if
    /// the configuration is invalid.
    pub fn build(self) -> McpResult<Orchestrator> {
        let Self {
            mut config,
            approval,
            input,
            launcher,
            cwd,
            home,
        } = self;

        config.validate()?;

        // Servers marked trusted in configuration are trusted for sampling.
        let mut trusted: Vec<ServerConfig> = config.servers.values().cloned().collect();
        if config.registry.include_known {
            trusted.extend(registry::known_servers(&config.registry));
        }
        for server in trusted.into_iter().filter(|s| s.trusted) {
            if !config.sampling.trusted_servers.contains(&server.name) {
                config.sampling.trusted_servers.push(server.name);
            }
        }

        let mut roots = RootsManager::new(config.roots.clone());
        if let Some(cwd) = cwd {
            roots = roots.with_cwd(cwd);
        }
        if let Some(home) = home {
            roots = roots.with_home(home);
        }
        let roots = Arc::new(roots);

        let mut elicitation = ElicitationHandler::new(config.elicitation.clone());
        if let Some(input) = input {
            elicitation = elicitation.with_input_source(input);
        }
        let elicitation = Arc::new(elicitation);

        let mut connections = ServerConnectionManager::new(config.connection.clone());
        if let Some(launcher) = launcher {
            connections = connections.with_launcher(launcher);
        }
        let connections = Arc::new(connections);

        let tools: Arc<dyn ToolCaller> = Arc::clone(&connections) as Arc<dyn ToolCaller>;
        let mut sampling = SamplingHandler::new(config.sampling.clone(), tools);
        if let Some(approval) = approval {
            sampling = sampling.with_approval_source(approval);
        }
        let sampling = Arc::new(sampling);

        connections.set_host_capabilities(Arc::new(
            HostCapabilities::new()
                .with_sampling(&sampling)
                .with_elicitation(Arc::clone(&elicitation))
                .with_roots(Arc::clone(&roots)),
        ));

        let subscription = roots.on_roots_changed(broadcast_listener(Arc::downgrade(&connections)));

        Ok(Orchestrator {
            config,
            connections,
            roots,
            sampling,
            elicitation,
            subscription: Mutex::new(Some(subscription)),
        })
    }
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}

/// Forward root changes to every connected server.
///
/// Listeners run synchronously inside root mutations, so the broadcast is
/// spawned on the current runtime. Outside a runtime it is skipped.
fn broadcast_listener(
    connections: Weak<ServerConnectionManager>,
) -> impl Fn(&[Root]) + Send + Sync + 'static {
    move |roots: &[Root]| {
        let Some(connections) = connections.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(count = roots.len(), "Broadcasting roots change");
                handle.spawn(async move {
                    connections.notify_roots_changed().await;
                });
            },
            Err(_) => {
                debug!("No async runtime; roots change not broadcast");
            },
        }
    }
}

/// Multi-server host.
pub struct Orchestrator {
    config: HostConfig,
    connections: Arc<ServerConnectionManager>,
    roots: Arc<RootsManager>,
    sampling: Arc<SamplingHandler>,
    elicitation: Arc<ElicitationHandler>,
    subscription: Mutex<Option<RootsSubscription>>,
}

impl Orchestrator {
    /// Build a host from `config` with the default sources and launcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: HostConfig) -> McpResult<Self> {
        OrchestratorBuilder::new(config).build()
    }

    /// Start building a host from `config`.
    #[must_use]
    pub fn builder(config: HostConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Get the connection manager.
    #[must_use]
    pub fn connections(&self) -> &Arc<ServerConnectionManager> {
        &self.connections
    }

    /// Get the roots manager.
    #[must_use]
    pub fn roots_manager(&self) -> &Arc<RootsManager> {
        &self.roots
    }

    /// Connect every server, compute roots and broadcast them.
    ///
    /// Servers that fail to connect are recorded in the `error` state and
    /// listed in the report; they never fail this call. Servers already
    /// connected are left alone.
    pub async fn initialize(&self) -> InitializeReport {
        let candidates = registry::default_servers(&self.config.registry, &self.config.servers);
        let mut pending = Vec::with_capacity(candidates.len());
        for server in candidates {
            if !self.connections.is_connected(&server.name).await {
                pending.push(server);
            }
        }

        info!(servers = pending.len(), "Initializing MCP host");

        let mut report = InitializeReport::default();
        for (name, outcome) in self.connections.connect_all(pending).await {
            match outcome {
                Ok(_) => report.connected.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }
        report.connected.sort();

        match self.roots.initialize() {
            Ok(roots) => report.roots = roots,
            Err(e) => warn!(error = %e, "Failed to compute roots"),
        }
        report.roots_notified = self.connections.notify_roots_changed().await;

        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            roots = report.roots.len(),
            "MCP host initialized"
        );
        report
    }

    /// Disconnect every server. Idempotent and best-effort.
    pub async fn shutdown(&self) {
        if let Some(subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.unsubscribe();
        }
        self.connections.disconnect_all().await;
        info!("MCP host shut down");
    }

    /// Connection state of every known server.
    pub async fn get_status(&self) -> HashMap<String, ConnectionState> {
        self.connections.get_status().await
    }

    /// Whether `server` is connected.
    pub async fn is_connected(&self, server: &str) -> bool {
        self.connections.is_connected(server).await
    }

    /// Snapshots of every known server.
    pub async fn server_statuses(&self) -> Vec<ServerStatus> {
        self.connections.server_statuses().await
    }

    /// Reconnect `server` explicitly.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::reconnect`].
    pub async fn reconnect(&self, server: &str) -> McpResult<ServerStatus> {
        self.connections.reconnect(server).await
    }

    /// Reconnect `server` if its restart policy allows.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::try_reconnect`].
    pub async fn try_reconnect(&self, server: &str) -> McpResult<bool> {
        self.connections.try_reconnect(server).await
    }

    /// List resources of `server`.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::list_resources`].
    pub async fn list_resources(
        &self,
        server: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<ResourceDefinition>> {
        self.connections.list_resources(server, timeout).await
    }

    /// Read `uri` from `server`.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::read_resource`].
    pub async fn read_resource(
        &self,
        server: &str,
        uri: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<ResourceContent>> {
        self.connections.read_resource(server, uri, timeout).await
    }

    /// List tools of `server`.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::list_tools`].
    pub async fn list_tools(
        &self,
        server: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<ToolDefinition>> {
        self.connections.list_tools(server, timeout).await
    }

    /// Call `tool` on `server`.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::call_tool`].
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> McpResult<ToolResult> {
        self.connections
            .call_tool(server, tool, arguments, timeout)
            .await
    }

    /// List prompts of `server`.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::list_prompts`].
    pub async fn list_prompts(
        &self,
        server: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<PromptDefinition>> {
        self.connections.list_prompts(server, timeout).await
    }

    /// Render prompt `name` from `server`.
    ///
    /// # Errors
    ///
    /// See [`ServerConnectionManager::get_prompt`].
    pub async fn get_prompt(
        &self,
        server: &str,
        name: &str,
        arguments: Option<Map<String, Value>>,
        timeout: Option<Duration>,
    ) -> McpResult<PromptContent> {
        self.connections
            .get_prompt(server, name, arguments, timeout)
            .await
    }

    /// Obtain a completion through the inference server.
    ///
    /// `Ok(None)` means the request was denied. `timeout` bounds the
    /// inference call; `None` uses the configured sampling timeout.
    ///
    /// # Errors
    ///
    /// See [`SamplingHandler::handle`].
    pub async fn sample(
        &self,
        request: SamplingRequest,
        timeout: Option<Duration>,
    ) -> McpResult<Option<SamplingResponse>> {
        self.sampling.handle(request, timeout).await
    }

    /// Collect structured input shaped by `schema`.
    ///
    /// # Errors
    ///
    /// See [`ElicitationHandler::handle`].
    pub async fn elicit(
        &self,
        message: impl Into<String>,
        schema: ElicitationSchema,
    ) -> McpResult<ElicitationResponse> {
        self.elicitation
            .handle(ElicitationRequest::new(message, schema))
            .await
    }

    /// Current roots.
    #[must_use]
    pub fn roots(&self) -> Vec<Root> {
        self.roots.roots()
    }

    /// Add a root and broadcast the new list.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidRootUri`](crate::McpError::InvalidRootUri)
    /// for non-`file` URIs.
    pub fn add_root(&self, uri: &str, name: impl Into<String>) -> McpResult<()> {
        self.roots.add_root(uri, name)
    }

    /// Remove a root and broadcast the new list. Returns whether it existed.
    pub fn remove_root(&self, uri: &str) -> bool {
        self.roots.remove_root(uri)
    }

    /// Replace the roots and broadcast the new list.
    ///
    /// # Errors
    ///
    /// Returns an error if any root URI is invalid.
    pub fn set_roots(&self, roots: Vec<Root>) -> McpResult<()> {
        self.roots.set_roots(roots)
    }

    /// Whether `path` lies inside a root.
    #[must_use]
    pub fn is_within_roots(&self, path: &Path) -> bool {
        self.roots.is_within_roots(path)
    }

    /// The most specific root containing `path`.
    #[must_use]
    pub fn get_root_for_path(&self, path: &Path) -> Option<Root> {
        self.roots.get_root_for_path(path)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("connections", &self.connections)
            .field("roots", &self.roots)
            .field("sampling", &self.sampling)
            .field("elicitation", &self.elicitation)
            .finish_non_exhaustive()
    }
}
