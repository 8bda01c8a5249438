//! Conversions between rmcp wire types and host types.

use rmcp::model::{
    CreateMessageRequestParams, CreateMessageResult, Role as RmcpRole, SamplingMessageContent,
};
use serde_json::{Map, Value};

use crate::elicitation::ElicitationSchema;
use crate::error::McpResult;
use crate::roots::Root;
use crate::sampling::{Role, SamplingMessage, SamplingRequest, SamplingResponse};

/// Build a host sampling request from a server's `sampling/createMessage`.
pub(super) fn sampling_request_from_rmcp(
    params: &CreateMessageRequestParams,
    server: &str,
) -> SamplingRequest {
    let messages = params
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                RmcpRole::User => Role::User,
                RmcpRole::Assistant => Role::Assistant,
            };
            let items: Vec<&SamplingMessageContent> = match &m.content {
                rmcp::model::SamplingContent::Single(item) => vec![item],
                rmcp::model::SamplingContent::Multiple(items) => items.iter().collect(),
            };
            let text = items
                .into_iter()
                .filter_map(|item| match item {
                    SamplingMessageContent::Text(t) => Some(t.text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            SamplingMessage {
                role,
                content: if text.is_empty() {
                    "[unsupported content]".to_string()
                } else {
                    text
                },
            }
        })
        .collect();

    // Preferences and metadata are read from the wire shape so that only
    // the fields the host understands are interpreted.
    let raw = serde_json::to_value(params).unwrap_or(Value::Null);
    let model_hints = raw
        .pointer("/modelPreferences/hints")
        .and_then(Value::as_array)
        .map(|hints| {
            hints
                .iter()
                .filter_map(|h| h.get("name").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let metadata = raw
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    let mut request = SamplingRequest::new(messages).from_server(server);
    request.system_prompt.clone_from(&params.system_prompt);
    request.model_hints = model_hints;
    request.max_tokens = Some(params.max_tokens);
    request.temperature = params.temperature.map(f64::from);
    request.metadata = metadata;
    request
}

/// Build the rmcp result for a completed sampling request.
pub(super) fn sampling_result_to_rmcp(response: SamplingResponse) -> CreateMessageResult {
    CreateMessageResult {
        model: response.model,
        stop_reason: Some(response.stop_reason.wire_name().to_string()),
        message: rmcp::model::SamplingMessage::assistant_text(response.content),
    }
}

/// Parse a requested form schema into the host schema subset.
pub(super) fn elicitation_schema_from_rmcp(
    schema: &rmcp::model::ElicitationSchema,
) -> McpResult<ElicitationSchema> {
    let value = serde_json::to_value(schema)?;
    Ok(serde_json::from_value(value)?)
}

/// Convert a host root to its wire form.
pub(super) fn root_to_rmcp(root: &Root) -> rmcp::model::Root {
    rmcp::model::Root {
        uri: root.uri.clone(),
        name: Some(root.name.clone()),
    }
}
