//! Sampling: model completions requested by servers or by the host.
//!
//! The host has no model of its own. A request is flattened into a prompt
//! and fulfilled by calling an inference tool on a designated server.
//! Requests from untrusted servers pass through an [`ApprovalSource`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalDecision, ApprovalSource, AutoApprove};
use crate::error::{McpError, McpResult};
use crate::types::ToolResult;

/// Labels an inference tool may put before its answer, in priority order.
const RESPONSE_LABELS: [&str; 2] = ["**Response:**", "Response:"];

/// Sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Ask the approval source before fulfilling a request.
    #[serde(default = "default_true")]
    pub require_approval: bool,
    /// Skip approval for trusted servers.
    #[serde(default = "default_true")]
    pub auto_approve_trusted: bool,
    /// Servers exempt from approval when `auto_approve_trusted` is set.
    #[serde(default)]
    pub trusted_servers: Vec<String>,
    /// Also review generated responses.
    #[serde(default)]
    pub approve_responses: bool,
    /// Server hosting the inference tool.
    #[serde(default = "default_inference_server")]
    pub inference_server: String,
    /// Tool invoked for each request.
    #[serde(default = "default_inference_tool")]
    pub inference_tool: String,
    /// Model passed when the request carries no hint.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Token bound passed when the request carries none.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    /// Temperature passed when the request carries none.
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
    /// Deadline for the inference call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_inference_server() -> String {
    crate::registry::INFERENCE_SERVER.to_string()
}

fn default_inference_tool() -> String {
    "run_inference".to_string()
}

fn default_model() -> String {
    "auto".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            require_approval: true,
            auto_approve_trusted: true,
            trusted_servers: Vec::new(),
            approve_responses: false,
            inference_server: default_inference_server(),
            inference_tool: default_inference_tool(),
            default_model: default_model(),
            default_max_tokens: default_max_tokens(),
            default_temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SamplingConfig {
    /// Inference call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether a request from `server_id` must be approved.
    #[must_use]
    pub fn requires_approval(&self, server_id: Option<&str>) -> bool {
        let trusted = server_id.is_some_and(|id| self.trusted_servers.iter().any(|t| t == id));
        self.require_approval && !(self.auto_approve_trusted && trusted)
    }
}

/// Speaker of a sampling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The user.
    User,
    /// The model.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("User"),
            Self::Assistant => f.write_str("Assistant"),
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingMessage {
    /// Speaker.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl SamplingMessage {
    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished its turn.
    #[default]
    EndTurn,
    /// The token bound was reached.
    MaxTokens,
    /// A stop sequence was produced.
    StopSequence,
}

impl StopReason {
    /// Wire name (`endTurn`, ...).
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::EndTurn => "endTurn",
            Self::MaxTokens => "maxTokens",
            Self::StopSequence => "stopSequence",
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingRequest {
    /// Correlation id.
    pub request_id: Uuid,
    /// Requesting server, or `None` for the host itself.
    pub server_id: Option<String>,
    /// Conversation in order.
    pub messages: Vec<SamplingMessage>,
    /// System prompt.
    pub system_prompt: Option<String>,
    /// Preferred models, best first.
    #[serde(default)]
    pub model_hints: Vec<String>,
    /// Token bound.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Caller metadata, returned untouched in the response.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SamplingRequest {
    /// Request for the given conversation.
    #[must_use]
    pub fn new(messages: Vec<SamplingMessage>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            server_id: None,
            messages,
            system_prompt: None,
            model_hints: Vec::new(),
            max_tokens: None,
            temperature: None,
            metadata: Map::new(),
        }
    }

    /// Request with a single user message.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(vec![SamplingMessage::user(text)])
    }

    /// Record the requesting server.
    #[must_use]
    pub fn from_server(mut self, server: impl Into<String>) -> Self {
        self.server_id = Some(server.into());
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Add a model hint.
    #[must_use]
    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hints.push(model.into());
        self
    }

    /// Set the token bound.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Flatten into a single prompt.
    ///
    /// The system prompt comes first, then each message as
    /// `<Role>: <content>`, separated by blank lines.
    #[must_use]
    pub fn flatten_prompt(&self) -> String {
        self.system_prompt
            .iter()
            .cloned()
            .chain(
                self.messages
                    .iter()
                    .map(|m| format!("{}: {}", m.role, m.content)),
            )
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingResponse {
    /// Generated text.
    pub content: String,
    /// Model that produced it.
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SamplingResponse {
    /// A finished text completion.
    #[must_use]
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            stop_reason: StopReason::EndTurn,
            metadata: Map::new(),
        }
    }

    /// Normalize raw inference tool output.
    ///
    /// When a response label is present only the text after it is kept,
    /// and a `Model: <name>` line before the label reports the model used.
    /// Without a label the whole output is both header and payload.
    /// Otherwise `requested_model` is reported.
    #[must_use]
    pub fn parse_tool_output(raw: &str, requested_model: &str) -> Self {
        let labelled = RESPONSE_LABELS.iter().find_map(|label| {
            raw.find(label)
                .map(|at| (at, at.saturating_add(label.len())))
        });

        let (header, content) = match labelled {
            Some((start, end)) => (
                raw.get(..start).unwrap_or_default(),
                raw.get(end..).map_or(raw, str::trim),
            ),
            None => (raw, raw),
        };

        let model = header
            .lines()
            .find_map(|line| line.trim().strip_prefix("Model:"))
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(requested_model);

        Self::text(content, model)
    }
}

/// Invokes tools on connected servers.
///
/// Implemented by the connection manager; sampling only needs this slice
/// of it.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    /// Whether `server` is connected.
    async fn is_connected(&self, server: &str) -> bool;

    /// Whether a host call to `server` is in flight.
    async fn is_busy(&self, _server: &str) -> bool {
        false
    }

    /// Call `tool` on `server`.
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> McpResult<ToolResult>;
}

/// Fulfills sampling requests through the inference server.
pub struct SamplingHandler {
    config: SamplingConfig,
    tools: Arc<dyn ToolCaller>,
    approval: Arc<dyn ApprovalSource>,
}

impl SamplingHandler {
    /// Create a handler that auto-approves.
    #[must_use]
    pub fn new(config: SamplingConfig, tools: Arc<dyn ToolCaller>) -> Self {
        Self {
            config,
            tools,
            approval: Arc::new(AutoApprove),
        }
    }

    /// Use `approval` for gating.
    #[must_use]
    pub fn with_approval_source(mut self, approval: Arc<dyn ApprovalSource>) -> Self {
        self.approval = approval;
        self
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Handle one request.
    ///
    /// Returns `Ok(None)` when the request or its response is denied. A
    /// denial is a refusal, not a failure.
    ///
    /// # Errors
    ///
    /// - [`McpError::InferenceServerUnavailable`] if the inference server is
    ///   not connected.
    /// - [`McpError::Timeout`] if the inference call exceeds `timeout`, or
    ///   the configured sampling timeout when `None`.
    /// - [`McpError::SamplingFailed`] for any other fulfillment failure,
    ///   including a request from the inference server itself while a host
    ///   call to it is in flight.
    pub async fn handle(
        &self,
        request: SamplingRequest,
        timeout: Option<Duration>,
    ) -> McpResult<Option<SamplingResponse>> {
        let needs_approval = self.config.requires_approval(request.server_id.as_deref());
        let origin = request.server_id.as_deref().unwrap_or("host");

        if needs_approval {
            if let ApprovalDecision::Deny { reason } = self.approval.review_request(&request).await
            {
                info!(
                    request_id = %request.request_id,
                    server = origin,
                    %reason,
                    "Sampling request denied"
                );
                return Ok(None);
            }
        } else {
            debug!(request_id = %request.request_id, server = origin, "Sampling approval skipped");
        }

        let response = self.fulfill(&request, timeout).await?;

        if needs_approval
            && self.config.approve_responses
            && let ApprovalDecision::Deny { reason } =
                self.approval.review_response(&request, &response).await
        {
            info!(
                request_id = %request.request_id,
                server = origin,
                %reason,
                "Sampling response denied"
            );
            return Ok(None);
        }

        Ok(Some(response))
    }

    async fn fulfill(
        &self,
        request: &SamplingRequest,
        timeout: Option<Duration>,
    ) -> McpResult<SamplingResponse> {
        let server = self.config.inference_server.as_str();

        if !self.tools.is_connected(server).await {
            return Err(McpError::InferenceServerUnavailable {
                server: server.to_string(),
            });
        }

        // The inference server asking for sampling during a host call to it
        // would wait on its own connection.
        if request.server_id.as_deref() == Some(server) && self.tools.is_busy(server).await {
            warn!(request_id = %request.request_id, server, "Re-entrant sampling request refused");
            return Err(McpError::SamplingFailed {
                server: server.to_string(),
                reason: "requested by the inference server while a host call to it is in flight"
                    .to_string(),
            });
        }

        let model = request
            .model_hints
            .first()
            .map_or(self.config.default_model.as_str(), String::as_str);
        let arguments = json!({
            "prompt": request.flatten_prompt(),
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(self.config.default_max_tokens),
            "temperature": request.temperature.unwrap_or(self.config.default_temperature),
        });

        info!(
            request_id = %request.request_id,
            server,
            tool = %self.config.inference_tool,
            model,
            "Fulfilling sampling request"
        );

        let result = self
            .tools
            .call_tool(
                server,
                &self.config.inference_tool,
                arguments,
                Some(timeout.unwrap_or_else(|| self.config.timeout())),
            )
            .await
            .map_err(|e| match e {
                McpError::Timeout { .. } => e,
                McpError::ServerNotConnected { .. } => McpError::InferenceServerUnavailable {
                    server: server.to_string(),
                },
                other => McpError::SamplingFailed {
                    server: server.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let text = result.text_content();
        if result.is_error {
            warn!(request_id = %request.request_id, server, "Inference tool reported an error");
            return Err(McpError::SamplingFailed {
                server: server.to_string(),
                reason: if text.is_empty() {
                    "inference tool returned an error".to_string()
                } else {
                    text
                },
            });
        }

        let mut response = SamplingResponse::parse_tool_output(&text, model);
        response.metadata.clone_from(&request.metadata);
        response
            .metadata
            .insert("inference_server".to_string(), Value::from(server));
        Ok(response)
    }
}

impl std::fmt::Debug for SamplingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
