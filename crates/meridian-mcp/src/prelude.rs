//! Prelude module - commonly used types for convenient import.
//!
//! Use `use meridian_mcp::prelude::*;` to import all essential types.

// Errors
pub use crate::{McpError, McpResult};

// Host
pub use crate::{InitializeReport, Orchestrator, OrchestratorBuilder};

// Configuration
pub use crate::{HostConfig, RestartPolicy, ServerConfig};

// Connections
pub use crate::{ConnectionState, ServerConnectionManager, ServerStatus};

// Host-privileged operations
pub use crate::{
    ApprovalDecision, ApprovalSource, ElicitationResponse, ElicitationSchema, InputOutcome,
    InputSource, PropertySchema, PropertyType, SamplingRequest, SamplingResponse,
};

// Roots
pub use crate::{Root, RootsManager};

// Capability results
pub use crate::{ToolDefinition, ToolResult};
