//! Structured user input requested by servers.
//!
//! Schemas are a deliberately small subset of JSON Schema: one flat object
//! whose properties are strings, numbers, integers or booleans, with
//! optional enum, default and required constraints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{McpError, McpResult};

/// Elicitation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElicitationConfig {
    /// Validate obtained data against the schema.
    #[serde(default = "default_true")]
    pub validate: bool,
    /// How long an interactive source may take before the request is
    /// cancelled, in seconds.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_response_timeout_secs() -> u64 {
    300
}

impl Default for ElicitationConfig {
    fn default() -> Self {
        Self {
            validate: true,
            response_timeout_secs: default_response_timeout_secs(),
        }
    }
}

impl ElicitationConfig {
    /// Interactive response deadline.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// Integral JSON number.
    Integer,
    /// JSON boolean.
    Boolean,
    /// Anything else; no synthesis or type check applies.
    #[serde(other)]
    Unsupported,
}

/// One property declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Declared type.
    #[serde(rename = "type")]
    pub kind: PropertyType,
    /// Description shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Value used when nothing else is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PropertySchema {
    /// Property of the given type with no constraints.
    #[must_use]
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            description: None,
            allowed: None,
            default: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restrict to the given values.
    #[must_use]
    pub fn with_enum(mut self, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the default.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

fn object_type() -> String {
    "object".to_string()
}

/// Schema of the requested data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitationSchema {
    /// Always `object`.
    #[serde(rename = "type", default = "object_type")]
    pub kind: String,
    /// Property declarations by name.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    /// Names that must carry a non-null value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Default for ElicitationSchema {
    fn default() -> Self {
        Self {
            kind: object_type(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ElicitationSchema {
    /// Empty object schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an optional property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Add a required property.
    #[must_use]
    pub fn required_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Whether `name` is required.
    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Check `data` against this schema.
    ///
    /// Every violation is collected; undeclared keys are allowed.
    ///
    /// # Errors
    ///
    /// Returns the list of violations if there are any.
    pub fn validate(&self, data: &Map<String, Value>) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for name in &self.required {
            if data.get(name).is_none_or(Value::is_null) {
                errors.push(format!("missing required field '{name}'"));
            }
        }

        for (name, value) in data {
            let Some(property) = self.properties.get(name) else {
                continue;
            };
            if value.is_null() {
                // Null on a required field is already reported above.
                continue;
            }
            match property.kind {
                PropertyType::Number | PropertyType::Integer => {
                    if !value.is_number() {
                        errors.push(format!("field '{name}' must be a number"));
                    }
                },
                PropertyType::Boolean => {
                    if !value.is_boolean() {
                        errors.push(format!("field '{name}' must be a boolean"));
                    }
                },
                PropertyType::String => {
                    if !value.is_string() {
                        errors.push(format!("field '{name}' must be a string"));
                    } else if let Some(allowed) = &property.allowed
                        && !allowed.contains(value)
                    {
                        let options = allowed
                            .iter()
                            .map(|v| v.as_str().map_or_else(|| v.to_string(), String::from))
                            .collect::<Vec<_>>()
                            .join(", ");
                        errors.push(format!("field '{name}' must be one of [{options}]"));
                    }
                },
                PropertyType::Unsupported => {},
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Produce data for this schema without asking anyone.
    ///
    /// Defaults win. Otherwise booleans are `true` when required and
    /// `false` when optional, strings take the first enum value or the
    /// placeholder `auto:<name>`, and numbers are `0`. Required names with
    /// no usable rule are set to null.
    #[must_use]
    pub fn synthesize(&self) -> Map<String, Value> {
        let mut data = Map::new();

        for (name, property) in &self.properties {
            let required = self.is_required(name);
            let value = match (&property.default, property.kind) {
                (Some(default), _) => Some(default.clone()),
                (None, PropertyType::Boolean) => Some(Value::Bool(required)),
                (None, PropertyType::String) => Some(
                    property
                        .allowed
                        .as_ref()
                        .and_then(|values| values.first().cloned())
                        .unwrap_or_else(|| Value::String(format!("auto:{name}"))),
                ),
                (None, PropertyType::Number | PropertyType::Integer) => Some(Value::from(0)),
                (None, PropertyType::Unsupported) => required.then_some(Value::Null),
            };
            if let Some(value) = value {
                data.insert(name.clone(), value);
            }
        }

        for name in &self.required {
            data.entry(name.clone()).or_insert(Value::Null);
        }

        data
    }
}

/// A request for structured input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationRequest {
    /// Correlation id.
    pub request_id: Uuid,
    /// Requesting server, if the request came from one.
    pub server: Option<String>,
    /// Message shown to the user.
    pub message: String,
    /// Shape of the requested data.
    pub schema: ElicitationSchema,
}

impl ElicitationRequest {
    /// Create a request.
    #[must_use]
    pub fn new(message: impl Into<String>, schema: ElicitationSchema) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            server: None,
            message: message.into(),
            schema,
        }
    }

    /// Record the requesting server.
    #[must_use]
    pub fn from_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }
}

/// Outcome of an elicitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitationResponse {
    /// Obtained data; empty when not approved.
    pub data: Map<String, Value>,
    /// Whether the user (or the synthesizer) supplied data.
    pub approved: bool,
    /// Why the request was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

impl ElicitationResponse {
    /// Approved response carrying `data`.
    #[must_use]
    pub fn approved(data: Map<String, Value>) -> Self {
        Self {
            data,
            approved: true,
            cancellation_reason: None,
        }
    }

    /// Cancelled response.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            data: Map::new(),
            approved: false,
            cancellation_reason: Some(reason.into()),
        }
    }
}

/// What an interactive source produced.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    /// The user submitted data.
    Submitted(Map<String, Value>),
    /// The user declined or dismissed the request.
    Cancelled {
        /// Reason reported to the server.
        reason: String,
    },
}

/// Interactive collector of user input.
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Show the request and collect the user's answer.
    async fn collect(&self, request: &ElicitationRequest) -> InputOutcome;
}

/// Obtains and validates structured input.
pub struct ElicitationHandler {
    config: ElicitationConfig,
    input: Option<Arc<dyn InputSource>>,
}

impl ElicitationHandler {
    /// Handler that synthesizes data.
    #[must_use]
    pub fn new(config: ElicitationConfig) -> Self {
        Self {
            config,
            input: None,
        }
    }

    /// Collect data from an interactive source instead of synthesizing.
    #[must_use]
    pub fn with_input_source(mut self, input: Arc<dyn InputSource>) -> Self {
        self.input = Some(input);
        self
    }

    /// Whether an interactive source is attached.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.input.is_some()
    }

    /// Handle one request.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ValidationFailed`] if validation is enabled and
    /// the obtained data violates the schema.
    pub async fn handle(&self, request: ElicitationRequest) -> McpResult<ElicitationResponse> {
        info!(
            request_id = %request.request_id,
            server = request.server.as_deref().unwrap_or("host"),
            fields = request.schema.properties.len(),
            message = %request.message,
            "Elicitation requested"
        );

        let data = match &self.input {
            Some(input) => {
                let timeout = self.config.response_timeout();
                match tokio::time::timeout(timeout, input.collect(&request)).await {
                    Ok(InputOutcome::Submitted(data)) => data,
                    Ok(InputOutcome::Cancelled { reason }) => {
                        info!(request_id = %request.request_id, %reason, "Elicitation cancelled");
                        return Ok(ElicitationResponse::cancelled(reason));
                    },
                    Err(_) => {
                        warn!(
                            request_id = %request.request_id,
                            timeout_secs = timeout.as_secs(),
                            "Elicitation timed out"
                        );
                        return Ok(ElicitationResponse::cancelled("timeout"));
                    },
                }
            },
            None => {
                debug!(request_id = %request.request_id, "No input source; synthesizing data");
                request.schema.synthesize()
            },
        };

        if self.config.validate {
            request
                .schema
                .validate(&data)
                .map_err(|errors| McpError::ValidationFailed { errors })?;
        }

        Ok(ElicitationResponse::approved(data))
    }
}

impl std::fmt::Debug for ElicitationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElicitationHandler")
            .field("config", &self.config)
            .field("interactive", &self.is_interactive())
            .finish()
    }
}
