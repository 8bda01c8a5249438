//! Server connection management.
//!
//! [`ServerConnectionManager`] owns every connection. Callers see state only
//! through snapshots ([`ServerStatus`], status maps) and address servers by
//! name.
//!
//! Each connection carries a gate held for the duration of a call, so a
//! server sees at most one in-flight request from the host. Calls to
//! different servers run concurrently.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParams, GetPromptRequestParams, ReadResourceRequestParams};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::IntoTransport;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::capabilities::{HostCapabilities, HostClientHandler};
use crate::config::{ConnectionSettings, ServerConfig};
use crate::error::{McpError, McpResult};
use crate::retry::RetryConfig;
use crate::sampling::ToolCaller;
use crate::transport::{Launched, ProcessLauncher, ServerLauncher};
use crate::types::{
    Capability, PromptContent, PromptDefinition, ResourceContent, ResourceDefinition,
    ServerCapabilities, ServerInfo, ToolDefinition, ToolResult,
};

type McpService = RunningService<RoleClient, HostClientHandler>;

/// Connection state of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Launch or handshake in progress.
    Connecting,
    /// Ready for calls.
    Connected,
    /// Closed on request.
    Disconnected,
    /// Launch, handshake or transport failed.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        })
    }
}

/// Read-only snapshot of one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server name.
    pub name: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Last error, when `state` is `error`.
    pub error: Option<String>,
    /// Negotiated capabilities.
    pub capabilities: ServerCapabilities,
    /// Handshake information.
    pub info: Option<ServerInfo>,
    /// Reconnects performed so far.
    pub restart_count: u32,
    /// When the current connection was established.
    pub connected_at: Option<DateTime<Utc>>,
    /// Whether the server is trusted.
    pub trusted: bool,
    /// Description.
    pub description: Option<String>,
}

/// A connection owned by the manager.
struct ConnectedServer {
    config: ServerConfig,
    service: Option<McpService>,
    capabilities: ServerCapabilities,
    state: ConnectionState,
    error: Option<String>,
    info: Option<ServerInfo>,
    restart_count: u32,
    last_restart_attempt: Option<Instant>,
    connected_at: Option<DateTime<Utc>>,
    gate: Arc<Mutex<()>>,
}

impl ConnectedServer {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            service: None,
            capabilities: ServerCapabilities::default(),
            state: ConnectionState::Connecting,
            error: None,
            info: None,
            restart_count: 0,
            last_restart_attempt: None,
            connected_at: None,
            gate: Arc::new(Mutex::new(())),
        }
    }

    fn peer(&self) -> Option<Peer<RoleClient>> {
        self.service.as_ref().map(|svc| svc.peer().clone())
    }

    fn status(&self) -> ServerStatus {
        ServerStatus {
            name: self.config.name.clone(),
            state: self.state,
            error: self.error.clone(),
            capabilities: self.capabilities,
            info: self.info.clone(),
            restart_count: self.restart_count,
            connected_at: self.connected_at,
            trusted: self.config.trusted,
            description: self.config.description.clone(),
        }
    }
}

/// Owns and drives every server connection.
pub struct ServerConnectionManager {
    servers: Arc<RwLock<HashMap<String, ConnectedServer>>>,
    settings: ConnectionSettings,
    launcher: Arc<dyn ServerLauncher>,
    host: std::sync::RwLock<Arc<HostCapabilities>>,
    backoff: RetryConfig,
}

impl ServerConnectionManager {
    /// Create a manager that spawns servers as child processes.
    #[must_use]
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            settings,
            launcher: Arc::new(ProcessLauncher),
            host: std::sync::RwLock::new(Arc::new(HostCapabilities::new())),
            backoff: RetryConfig::restart(),
        }
    }

    /// Launch servers through `launcher`.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ServerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Use `backoff` between automatic reconnects.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the handlers offered to servers connected from now on.
    pub fn set_host_capabilities(&self, host: Arc<HostCapabilities>) {
        *self.host.write().unwrap_or_else(PoisonError::into_inner) = host;
    }

    fn host_capabilities(&self) -> Arc<HostCapabilities> {
        Arc::clone(&self.host.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Get the connection settings.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Launch `config` and perform the handshake.
    ///
    /// # Errors
    ///
    /// - [`McpError::AlreadyConnected`] if the server is connected or
    ///   connecting.
    /// - [`McpError::ConnectFailed`] if launch or handshake fails. The
    ///   server is then recorded in the `error` state.
    pub async fn connect(&self, config: ServerConfig) -> McpResult<ServerStatus> {
        self.begin_connect(&config).await?;

        let outcome = match self.launcher.launch(&config) {
            Ok(Launched::Process(transport)) => self.handshake(&config.name, transport).await,
            Ok(Launched::Stream(transport)) => self.handshake(&config.name, transport).await,
            Err(e) => Err(e),
        };

        self.finish_connect(&config.name, outcome).await
    }

    /// Connect `config` over an already established transport.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn attach<T, E, A>(
        &self,
        config: ServerConfig,
        transport: T,
    ) -> McpResult<ServerStatus>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.begin_connect(&config).await?;
        let outcome = self.handshake(&config.name, transport).await;
        self.finish_connect(&config.name, outcome).await
    }

    /// Connect every server concurrently.
    ///
    /// A failure affects only its own server; every outcome is returned in
    /// input order.
    pub async fn connect_all(
        &self,
        configs: Vec<ServerConfig>,
    ) -> Vec<(String, McpResult<ServerStatus>)> {
        let attempts = configs.into_iter().map(|config| async move {
            let name = config.name.clone();
            (name, self.connect(config).await)
        });
        join_all(attempts).await
    }

    async fn begin_connect(&self, config: &ServerConfig) -> McpResult<()> {
        let mut servers = self.servers.write().await;

        match servers.get_mut(&config.name) {
            Some(existing)
                if matches!(
                    existing.state,
                    ConnectionState::Connected | ConnectionState::Connecting
                ) =>
            {
                return Err(McpError::AlreadyConnected {
                    name: config.name.clone(),
                });
            },
            Some(existing) => {
                existing.config = config.clone();
                existing.state = ConnectionState::Connecting;
                existing.error = None;
            },
            None => {
                servers.insert(config.name.clone(), ConnectedServer::new(config.clone()));
            },
        }

        info!(server = %config.name, "Connecting MCP server");
        Ok(())
    }

    async fn handshake<T, E, A>(&self, name: &str, transport: T) -> McpResult<McpService>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let handler = HostClientHandler::new(name, self.host_capabilities());
        let deadline = self.settings.request_timeout();

        match tokio::time::timeout(deadline, handler.serve(transport)).await {
            Ok(Ok(service)) => Ok(service),
            Ok(Err(e)) => Err(McpError::ConnectFailed {
                name: name.to_string(),
                reason: format!("handshake failed: {e}"),
            }),
            Err(_) => Err(McpError::ConnectFailed {
                name: name.to_string(),
                reason: format!("handshake timed out after {}s", deadline.as_secs()),
            }),
        }
    }

    async fn finish_connect(
        &self,
        name: &str,
        outcome: McpResult<McpService>,
    ) -> McpResult<ServerStatus> {
        let host_sampling = self.host_capabilities().has_sampling();
        let mut servers = self.servers.write().await;
        let Some(entry) = servers.get_mut(name) else {
            return Err(McpError::ServerNotFound {
                name: name.to_string(),
            });
        };

        match outcome {
            Ok(service) => {
                let (capabilities, info) = match service.peer_info() {
                    Some(peer_info) => (
                        ServerCapabilities::negotiated(&peer_info.capabilities, host_sampling),
                        Some(ServerInfo::from_rmcp(peer_info)),
                    ),
                    None => (
                        ServerCapabilities {
                            sampling: host_sampling,
                            ..ServerCapabilities::all()
                        },
                        None,
                    ),
                };

                entry.service = Some(service);
                entry.capabilities = capabilities;
                entry.info = info;
                entry.state = ConnectionState::Connected;
                entry.error = None;
                entry.connected_at = Some(Utc::now());

                info!(
                    server = %name,
                    tools = capabilities.tools,
                    resources = capabilities.resources,
                    prompts = capabilities.prompts,
                    "MCP server connected"
                );
                Ok(entry.status())
            },
            Err(e) => {
                error!(server = %name, error = %e, "MCP server failed to connect");
                entry.state = ConnectionState::Error;
                entry.error = Some(e.to_string());
                entry.service = None;
                Err(e)
            },
        }
    }

    /// Close the connection to `name`.
    ///
    /// Best-effort: close failures are logged. Returns whether a live
    /// connection was closed. The server stays known in the `disconnected`
    /// state.
    pub async fn disconnect(&self, name: &str) -> bool {
        let service = {
            let mut servers = self.servers.write().await;
            let Some(entry) = servers.get_mut(name) else {
                return false;
            };
            if entry.state == ConnectionState::Connected {
                entry.state = ConnectionState::Disconnected;
                entry.connected_at = None;
            }
            entry.service.take()
        };

        let Some(mut service) = service else {
            return false;
        };

        info!(server = %name, "Disconnecting MCP server");
        let timeout = self.settings.shutdown_timeout();
        match service.close_with_timeout(timeout).await {
            Ok(Some(reason)) => {
                debug!(server = %name, ?reason, "MCP session closed");
            },
            Ok(None) => {
                warn!(
                    server = %name,
                    timeout_secs = timeout.as_secs(),
                    "MCP session close timed out; dropping"
                );
            },
            Err(e) => {
                warn!(server = %name, error = %e, "MCP session close failed");
            },
        }
        true
    }

    /// Close every connection concurrently. Best-effort.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        let closed = join_all(names.iter().map(|name| self.disconnect(name))).await;
        let count = closed.into_iter().filter(|c| *c).count();
        if count > 0 {
            info!(count, "Disconnected MCP servers");
        }
    }

    /// Reconnect `name` with its stored configuration.
    ///
    /// A live connection is closed first. The restart counter is
    /// incremented.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotFound`] if the server was never
    /// connected, or the connect error.
    pub async fn reconnect(&self, name: &str) -> McpResult<ServerStatus> {
        let config = {
            let servers = self.servers.read().await;
            servers
                .get(name)
                .map(|s| s.config.clone())
                .ok_or_else(|| McpError::ServerNotFound {
                    name: name.to_string(),
                })?
        };

        self.disconnect(name).await;

        let attempt = {
            let mut servers = self.servers.write().await;
            servers.get_mut(name).map_or(0, |entry| {
                entry.restart_count = entry.restart_count.saturating_add(1);
                entry.last_restart_attempt = Some(Instant::now());
                entry.restart_count
            })
        };
        info!(server = %name, attempt, "Reconnecting MCP server");

        self.connect(config).await
    }

    /// Reconnect `name` if its restart policy and backoff allow it.
    ///
    /// Returns `Ok(false)` when no attempt was made.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotFound`] for unknown servers, or the
    /// error of the attempted reconnect.
    pub async fn try_reconnect(&self, name: &str) -> McpResult<bool> {
        {
            let servers = self.servers.read().await;
            let entry = servers.get(name).ok_or_else(|| McpError::ServerNotFound {
                name: name.to_string(),
            })?;

            if matches!(
                entry.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                return Ok(false);
            }
            if !entry.config.restart_policy.allows(entry.restart_count) {
                debug!(server = %name, restarts = entry.restart_count, "Restart policy exhausted");
                return Ok(false);
            }
            if let Some(last) = entry.last_restart_attempt {
                let required = self.backoff.delay_for_attempt(entry.restart_count);
                if last.elapsed() < required {
                    debug!(
                        server = %name,
                        wait_secs = required.saturating_sub(last.elapsed()).as_secs(),
                        "Reconnect backoff not elapsed"
                    );
                    return Ok(false);
                }
            }
        }

        self.reconnect(name).await.map(|_| true)
    }

    /// Connection state of every known server.
    pub async fn get_status(&self) -> HashMap<String, ConnectionState> {
        self.servers
            .read()
            .await
            .iter()
            .map(|(name, s)| (name.clone(), s.state))
            .collect()
    }

    /// Whether `name` is connected.
    pub async fn is_connected(&self, name: &str) -> bool {
        self.servers
            .read()
            .await
            .get(name)
            .is_some_and(|s| s.state == ConnectionState::Connected)
    }

    /// Whether a request to `name` currently holds its gate.
    pub async fn is_busy(&self, name: &str) -> bool {
        self.servers
            .read()
            .await
            .get(name)
            .is_some_and(|s| s.gate.try_lock().is_err())
    }

    /// Names of connected servers, sorted.
    pub async fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .servers
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.state == ConnectionState::Connected)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of one server.
    pub async fn server_status(&self, name: &str) -> Option<ServerStatus> {
        self.servers.read().await.get(name).map(ConnectedServer::status)
    }

    /// Snapshots of every known server, sorted by name.
    pub async fn server_statuses(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<ServerStatus> = self
            .servers
            .read()
            .await
            .values()
            .map(ConnectedServer::status)
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Tell every connected server that the root list changed.
    ///
    /// Best-effort; returns how many servers were notified.
    pub async fn notify_roots_changed(&self) -> usize {
        if !self.host_capabilities().has_roots() {
            return 0;
        }

        let peers: Vec<(String, Peer<RoleClient>)> = self
            .servers
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.state == ConnectionState::Connected)
            .filter_map(|(name, s)| s.peer().map(|p| (name.clone(), p)))
            .collect();

        let results = join_all(peers.into_iter().map(|(name, peer)| async move {
            let result = peer.notify_roots_list_changed().await;
            (name, result)
        }))
        .await;

        let mut notified = 0usize;
        for (name, result) in results {
            match result {
                Ok(()) => notified = notified.saturating_add(1),
                Err(e) => warn!(server = %name, error = %e, "Failed to send roots notification"),
            }
        }
        debug!(notified, "Roots change broadcast");
        notified
    }

    /// Look up a callable connection for `capability`.
    async fn checkout(
        &self,
        server: &str,
        capability: Capability,
    ) -> McpResult<(Peer<RoleClient>, Arc<Mutex<()>>)> {
        let servers = self.servers.read().await;
        let not_connected = || McpError::ServerNotConnected {
            name: server.to_string(),
        };

        let entry = servers
            .get(server)
            .filter(|s| s.state == ConnectionState::Connected)
            .ok_or_else(not_connected)?;

        if !entry.capabilities.supports(capability) {
            return Err(McpError::CapabilityNotSupported {
                server: server.to_string(),
                capability: capability.as_str(),
            });
        }

        let peer = entry.peer().ok_or_else(not_connected)?;
        Ok((peer, Arc::clone(&entry.gate)))
    }

    /// Run one request under the server's gate and a deadline.
    async fn run<T, F, Fut>(
        &self,
        server: &str,
        capability: Capability,
        operation: &str,
        timeout: Option<Duration>,
        call: F,
    ) -> McpResult<T>
    where
        F: FnOnce(Peer<RoleClient>) -> Fut,
        Fut: Future<Output = Result<T, rmcp::ServiceError>>,
    {
        let (peer, gate) = self.checkout(server, capability).await?;
        let deadline = timeout.unwrap_or_else(|| self.settings.request_timeout());

        debug!(server = %server, operation, "Sending MCP request");
        let outcome = tokio::time::timeout(deadline, async {
            let _turn = gate.lock().await;
            call(peer).await
        })
        .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.mark_if_closed(server).await;
                Err(McpError::RemoteCallFailed {
                    server: server.to_string(),
                    operation: operation.to_string(),
                    reason: e.to_string(),
                })
            },
            Err(_) => {
                warn!(server = %server, operation, "MCP request timed out");
                Err(McpError::Timeout {
                    server: server.to_string(),
                    operation: operation.to_string(),
                    timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                })
            },
        }
    }

    /// Move a server whose transport died into the `error` state.
    async fn mark_if_closed(&self, server: &str) {
        let mut servers = self.servers.write().await;
        if let Some(entry) = servers.get_mut(server)
            && entry.state == ConnectionState::Connected
            && entry.service.as_ref().is_some_and(RunningService::is_closed)
        {
            warn!(server = %server, "MCP transport closed");
            entry.state = ConnectionState::Error;
            entry.error = Some("transport closed".to_string());
            entry.service = None;
            entry.connected_at = None;
        }
    }

    /// List resources of `server`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotConnected`],
    /// [`McpError::CapabilityNotSupported`], [`McpError::Timeout`] or
    /// [`McpError::RemoteCallFailed`].
    pub async fn list_resources(
        &self,
        server: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<ResourceDefinition>> {
        let resources = self
            .run(
                server,
                Capability::Resources,
                "resources/list",
                timeout,
                |peer| async move { peer.list_all_resources().await },
            )
            .await?;

        Ok(resources
            .iter()
            .map(|r| ResourceDefinition::from_rmcp(r, server))
            .collect())
    }

    /// Read resource `uri` from `server`.
    ///
    /// # Errors
    ///
    /// See [`list_resources`](Self::list_resources).
    pub async fn read_resource(
        &self,
        server: &str,
        uri: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<ResourceContent>> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let result = self
            .run(
                server,
                Capability::Resources,
                "resources/read",
                timeout,
                |peer| async move { peer.read_resource(params).await },
            )
            .await?;

        Ok(result
            .contents
            .iter()
            .map(ResourceContent::from_rmcp)
            .collect())
    }

    /// List tools of `server`.
    ///
    /// # Errors
    ///
    /// See [`list_resources`](Self::list_resources).
    pub async fn list_tools(
        &self,
        server: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<ToolDefinition>> {
        let tools = self
            .run(server, Capability::Tools, "tools/list", timeout, |peer| async move {
                peer.list_all_tools().await
            })
            .await?;

        Ok(tools
            .iter()
            .map(|t| ToolDefinition::from_rmcp(t, server))
            .collect())
    }

    /// Call `tool` on `server`.
    ///
    /// Arguments are passed through untouched when they are an object;
    /// `null` sends no arguments and any other value is wrapped as
    /// `{"value": ...}`.
    ///
    /// # Errors
    ///
    /// See [`list_resources`](Self::list_resources). A result flagged
    /// `isError` by the server is returned as a [`ToolResult`], not an
    /// error.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> McpResult<ToolResult> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Some(map)
            },
        };
        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(tool.to_string()),
            arguments,
            task: None,
        };

        let operation = format!("tools/call {tool}");
        let result = self
            .run(server, Capability::Tools, &operation, timeout, |peer| async move {
                peer.call_tool(params).await
            })
            .await?;

        debug!(server = %server, tool, "Tool call completed");
        Ok(ToolResult::from(result))
    }

    /// List prompts of `server`.
    ///
    /// # Errors
    ///
    /// See [`list_resources`](Self::list_resources).
    pub async fn list_prompts(
        &self,
        server: &str,
        timeout: Option<Duration>,
    ) -> McpResult<Vec<PromptDefinition>> {
        let prompts = self
            .run(server, Capability::Prompts, "prompts/list", timeout, |peer| async move {
                peer.list_all_prompts().await
            })
            .await?;

        Ok(prompts
            .iter()
            .map(|p| PromptDefinition::from_rmcp(p, server))
            .collect())
    }

    /// Render prompt `name` from `server`.
    ///
    /// # Errors
    ///
    /// See [`list_resources`](Self::list_resources).
    pub async fn get_prompt(
        &self,
        server: &str,
        name: &str,
        arguments: Option<Map<String, Value>>,
        timeout: Option<Duration>,
    ) -> McpResult<PromptContent> {
        let params = GetPromptRequestParams {
            meta: None,
            name: name.to_string(),
            arguments,
        };
        let operation = format!("prompts/get {name}");
        let result = self
            .run(server, Capability::Prompts, &operation, timeout, |peer| async move {
                peer.get_prompt(params).await
            })
            .await?;

        Ok(PromptContent::from_rmcp(&result))
    }
}

#[async_trait]
impl ToolCaller for ServerConnectionManager {
    async fn is_connected(&self, server: &str) -> bool {
        ServerConnectionManager::is_connected(self, server).await
    }

    async fn is_busy(&self, server: &str) -> bool {
        ServerConnectionManager::is_busy(self, server).await
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> McpResult<ToolResult> {
        ServerConnectionManager::call_tool(self, server, tool, arguments, timeout).await
    }
}

impl std::fmt::Debug for ServerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnectionManager")
            .field("settings", &self.settings)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
