//! Meridian MCP - multi-server MCP host core.
//!
//! This crate provides:
//! - Connections to several MCP servers at once, each isolated from the
//!   others' failures
//! - Uniform access to their tools, resources and prompts
//! - Host handling of server-initiated sampling and elicitation requests
//! - Shared filesystem roots, broadcast to every connected server
//!
//! # Architecture
//!
//! The [`Orchestrator`] is the entry point. It composes a
//! [`ServerConnectionManager`] (built on the official `rmcp` SDK), a
//! [`RootsManager`], a [`SamplingHandler`] that fulfills completions
//! through an inference server, and an [`ElicitationHandler`] that
//! validates collected input against a small object schema. Approval and
//! interactive input are pluggable through [`ApprovalSource`] and
//! [`InputSource`].
//!
//! # Example
//!
//! ```rust,no_run
//! use meridian_mcp::{HostConfig, Orchestrator, SamplingRequest, ServerConfig};
//!
//! # async fn example() -> Result<(), meridian_mcp::McpError> {
//! let mut config = HostConfig::default();
//! config.add_server(
//!     ServerConfig::stdio("filesystem", "npx")
//!         .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]),
//! );
//!
//! let host = Orchestrator::new(config)?;
//! let report = host.initialize().await;
//! for (name, reason) in &report.failed {
//!     eprintln!("{name} failed: {reason}");
//! }
//!
//! let tools = host.list_tools("filesystem", None).await?;
//! for tool in tools {
//!     println!("Tool: {}", tool.qualified_name());
//! }
//!
//! if let Some(answer) = host.sample(SamplingRequest::from_text("Summarize /tmp"), None).await? {
//!     println!("{}", answer.content);
//! }
//!
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod approval;
mod config;
mod elicitation;
mod error;
mod orchestrator;
mod retry;
mod roots;
mod sampling;
mod server;
mod transport;
mod types;

pub mod capabilities;
pub mod registry;

pub use approval::{ApprovalDecision, ApprovalSource, AutoApprove};
pub use config::{ConnectionSettings, HostConfig, RestartPolicy, ServerConfig};
pub use elicitation::{
    ElicitationConfig, ElicitationHandler, ElicitationRequest, ElicitationResponse,
    ElicitationSchema, InputOutcome, InputSource, PropertySchema, PropertyType,
};
pub use error::{McpError, McpResult};
pub use orchestrator::{InitializeReport, Orchestrator, OrchestratorBuilder};
pub use registry::RegistryOptions;
pub use retry::RetryConfig;
pub use roots::{
    Root, RootsConfig, RootsManager, RootsSubscription, WorkspaceMarker, normalize_path,
    path_to_uri, uri_to_path,
};
pub use sampling::{
    Role, SamplingConfig, SamplingHandler, SamplingMessage, SamplingRequest, SamplingResponse,
    StopReason, ToolCaller,
};
pub use server::{ConnectionState, ServerConnectionManager, ServerStatus};
pub use transport::{Launched, ProcessLauncher, ServerLauncher};
pub use types::{
    Capability, PromptArgument, PromptContent, PromptDefinition, PromptMessage, ResourceContent,
    ResourceDefinition, ServerCapabilities, ServerInfo, ToolContent, ToolDefinition, ToolResult,
};
