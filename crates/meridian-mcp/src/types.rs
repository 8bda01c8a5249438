//! Capability payload types surfaced to callers.
//!
//! Tool arguments and results stay opaque JSON; these types only give the
//! envelopes a stable shape independent of the wire SDK.

use rmcp::model::{self as rmcp_model, RawContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability kinds a connected server may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// `resources/*` requests.
    Resources,
    /// `tools/*` requests.
    Tools,
    /// `prompts/*` requests.
    Prompts,
    /// Server-initiated `sampling/createMessage`.
    Sampling,
}

impl Capability {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resources => "resources",
            Self::Tools => "tools",
            Self::Prompts => "prompts",
            Self::Sampling => "sampling",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiated capability set of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ServerCapabilities {
    /// Server answers `resources/list` and `resources/read`.
    #[serde(default)]
    pub resources: bool,
    /// Server answers `tools/list` and `tools/call`.
    #[serde(default)]
    pub tools: bool,
    /// Server answers `prompts/list` and `prompts/get`.
    #[serde(default)]
    pub prompts: bool,
    /// The host offered sampling on this connection.
    #[serde(default)]
    pub sampling: bool,
}

impl ServerCapabilities {
    /// Build the negotiated set from the handshake result.
    #[must_use]
    pub fn negotiated(caps: &rmcp_model::ServerCapabilities, host_sampling: bool) -> Self {
        Self {
            resources: caps.resources.is_some(),
            tools: caps.tools.is_some(),
            prompts: caps.prompts.is_some(),
            sampling: host_sampling,
        }
    }

    /// Every capability enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            resources: true,
            tools: true,
            prompts: true,
            sampling: true,
        }
    }

    /// Whether `capability` is available.
    #[must_use]
    pub const fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Resources => self.resources,
            Capability::Tools => self.tools,
            Capability::Prompts => self.prompts,
            Capability::Sampling => self.sampling,
        }
    }
}

/// What a server reported about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Implementation name reported by the server.
    pub implementation: String,
    /// Implementation version reported by the server.
    pub version: String,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Usage instructions, if the server sent any.
    pub instructions: Option<String>,
}

impl ServerInfo {
    /// Convert from the rmcp handshake result.
    #[must_use]
    pub fn from_rmcp(info: &rmcp_model::InitializeResult) -> Self {
        Self {
            implementation: info.server_info.name.clone(),
            version: info.server_info.version.clone(),
            protocol_version: info.protocol_version.to_string(),
            instructions: info.instructions.clone(),
        }
    }
}

/// A tool exposed by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Owning server.
    pub server: String,
    /// Description.
    pub description: Option<String>,
    /// JSON Schema of the arguments.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Convert from an rmcp `Tool`.
    #[must_use]
    pub fn from_rmcp(tool: &rmcp_model::Tool, server: &str) -> Self {
        Self {
            name: tool.name.to_string(),
            server: server.to_string(),
            description: tool.description.as_deref().map(String::from),
            input_schema: serde_json::to_value(&*tool.input_schema)
                .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
        }
    }

    /// `server:tool` identifier.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.server, self.name)
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content items in server order.
    pub content: Vec<ToolContent>,
    /// The server flagged the call as failed.
    pub is_error: bool,
}

impl ToolResult {
    /// A successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// All text items joined by newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<rmcp_model::CallToolResult> for ToolResult {
    fn from(result: rmcp_model::CallToolResult) -> Self {
        Self {
            content: result.content.iter().map(ToolContent::from_rmcp).collect(),
            is_error: result.is_error.unwrap_or(false),
        }
    }
}

/// A single content item of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Base64 audio.
    Audio {
        /// Base64 payload.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Embedded or linked resource.
    Resource(ResourceContent),
}

impl ToolContent {
    fn from_rmcp(content: &rmcp_model::Content) -> Self {
        match &**content {
            RawContent::Text(text) => Self::Text {
                text: text.text.clone(),
            },
            RawContent::Image(image) => Self::Image {
                data: image.data.clone(),
                mime_type: image.mime_type.clone(),
            },
            RawContent::Audio(audio) => Self::Audio {
                data: audio.data.clone(),
                mime_type: audio.mime_type.clone(),
            },
            RawContent::Resource(embedded) => {
                Self::Resource(ResourceContent::from_rmcp(&embedded.resource))
            },
            RawContent::ResourceLink(link) => Self::Resource(ResourceContent {
                uri: link.uri.clone(),
                mime_type: link.mime_type.clone(),
                text: None,
                blob: None,
            }),
        }
    }
}

/// A resource listed by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: String,
    /// Owning server.
    pub server: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// MIME type.
    pub mime_type: Option<String>,
}

impl ResourceDefinition {
    /// Convert from an rmcp `Resource`.
    #[must_use]
    pub fn from_rmcp(resource: &rmcp_model::Resource, server: &str) -> Self {
        Self {
            uri: resource.uri.clone(),
            server: server.to_string(),
            name: resource.name.clone(),
            description: resource.description.clone(),
            mime_type: resource.mime_type.clone(),
        }
    }
}

/// Contents of a read resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContent {
    /// Resource URI.
    pub uri: String,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Text body.
    pub text: Option<String>,
    /// Base64 body.
    pub blob: Option<String>,
}

impl ResourceContent {
    /// Convert from rmcp `ResourceContents`.
    #[must_use]
    pub fn from_rmcp(contents: &rmcp_model::ResourceContents) -> Self {
        match contents {
            rmcp_model::ResourceContents::TextResourceContents {
                uri,
                mime_type,
                text,
                ..
            } => Self {
                uri: uri.clone(),
                mime_type: mime_type.clone(),
                text: Some(text.clone()),
                blob: None,
            },
            rmcp_model::ResourceContents::BlobResourceContents {
                uri,
                mime_type,
                blob,
                ..
            } => Self {
                uri: uri.clone(),
                mime_type: mime_type.clone(),
                text: None,
                blob: Some(blob.clone()),
            },
        }
    }
}

/// A prompt template listed by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Prompt name.
    pub name: String,
    /// Owning server.
    pub server: String,
    /// Description.
    pub description: Option<String>,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl PromptDefinition {
    /// Convert from an rmcp `Prompt`.
    #[must_use]
    pub fn from_rmcp(prompt: &rmcp_model::Prompt, server: &str) -> Self {
        let arguments = prompt
            .arguments
            .iter()
            .flatten()
            .map(|a| PromptArgument {
                name: a.name.clone(),
                description: a.description.clone(),
                required: a.required.unwrap_or(false),
            })
            .collect();

        Self {
            name: prompt.name.clone(),
            server: server.to_string(),
            description: prompt.description.clone(),
            arguments,
        }
    }
}

/// A prompt argument declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Must be supplied.
    #[serde(default)]
    pub required: bool,
}

/// A rendered prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContent {
    /// Description.
    pub description: Option<String>,
    /// Rendered messages.
    pub messages: Vec<PromptMessage>,
}

/// One rendered prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Text rendering of the content.
    pub content: String,
}

impl PromptContent {
    /// Convert from an rmcp `GetPromptResult`.
    #[must_use]
    pub fn from_rmcp(result: &rmcp_model::GetPromptResult) -> Self {
        let messages = result
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    rmcp_model::PromptMessageRole::User => "user",
                    rmcp_model::PromptMessageRole::Assistant => "assistant",
                };
                let content = match &m.content {
                    rmcp_model::PromptMessageContent::Text { text } => text.clone(),
                    rmcp_model::PromptMessageContent::Image { image } => {
                        format!("[image: {}]", image.mime_type)
                    },
                    rmcp_model::PromptMessageContent::Resource { resource } => {
                        resource.get_text()
                    },
                    rmcp_model::PromptMessageContent::ResourceLink { link } => {
                        format!("[resource: {}]", link.uri)
                    },
                };
                PromptMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect();

        Self {
            description: result.description.clone(),
            messages,
        }
    }
}
