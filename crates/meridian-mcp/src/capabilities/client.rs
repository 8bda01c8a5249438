//! `rmcp::ClientHandler` for one server connection.

use std::sync::Arc;

use rmcp::model::{
    ClientCapabilities, ClientInfo, CreateElicitationRequestParams, CreateElicitationResult,
    CreateMessageRequestParams, CreateMessageResult, ElicitationAction, ElicitationCapability,
    FormElicitationCapability, Implementation, ListRootsResult, RootsCapabilities,
    SamplingCapability,
};
use rmcp::service::{RequestContext, RoleClient};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::elicitation::ElicitationRequest;
use crate::error::McpError;

use super::convert::{
    elicitation_schema_from_rmcp, root_to_rmcp, sampling_request_from_rmcp,
    sampling_result_to_rmcp,
};
use super::handler::HostCapabilities;

/// Serves requests a server sends to the host.
///
/// One instance is created per connection so every request carries the
/// name of the server it came from.
pub struct HostClientHandler {
    server_name: String,
    host: Arc<HostCapabilities>,
}

impl HostClientHandler {
    /// Create a handler for `server_name`.
    pub fn new(server_name: impl Into<String>, host: Arc<HostCapabilities>) -> Self {
        Self {
            server_name: server_name.into(),
            host,
        }
    }

    /// Name of the server this handler serves.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

impl rmcp::ClientHandler for HostClientHandler {
    fn get_info(&self) -> ClientInfo {
        let capabilities = ClientCapabilities {
            roots: self.host.has_roots().then_some(RootsCapabilities {
                list_changed: Some(true),
            }),
            sampling: self.host.has_sampling().then(SamplingCapability::default),
            elicitation: self.host.has_elicitation().then(|| ElicitationCapability {
                form: Some(FormElicitationCapability::default()),
                url: None,
            }),
            ..Default::default()
        };

        ClientInfo {
            capabilities,
            client_info: Implementation {
                name: "meridian".to_string(),
                title: Some("Meridian MCP Host".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            ..ClientInfo::default()
        }
    }

    async fn create_message(
        &self,
        params: CreateMessageRequestParams,
        _context: RequestContext<RoleClient>,
    ) -> Result<CreateMessageResult, rmcp::ErrorData> {
        let Some(sampling) = self.host.sampling() else {
            return Err(rmcp::ErrorData::internal_error(
                "Sampling not supported",
                None,
            ));
        };

        let request = sampling_request_from_rmcp(&params, &self.server_name);
        debug!(
            server = %self.server_name,
            request_id = %request.request_id,
            "Server requested sampling"
        );

        match sampling.handle(request, None).await {
            Ok(Some(response)) => Ok(sampling_result_to_rmcp(response)),
            Ok(None) => Err(rmcp::ErrorData::invalid_request(
                "Sampling request was declined by the host",
                None,
            )),
            Err(e) => {
                warn!(server = %self.server_name, error = %e, "Sampling failed");
                Err(rmcp::ErrorData::internal_error(e.to_string(), None))
            },
        }
    }

    async fn list_roots(
        &self,
        _context: RequestContext<RoleClient>,
    ) -> Result<ListRootsResult, rmcp::ErrorData> {
        let Some(roots) = self.host.roots() else {
            return Err(rmcp::ErrorData::internal_error("Roots not supported", None));
        };

        let snapshot = roots.snapshot();
        debug!(server = %self.server_name, count = snapshot.len(), "Server listed roots");

        Ok(ListRootsResult {
            roots: snapshot.iter().map(root_to_rmcp).collect(),
        })
    }

    async fn create_elicitation(
        &self,
        request: CreateElicitationRequestParams,
        _context: RequestContext<RoleClient>,
    ) -> Result<CreateElicitationResult, rmcp::ErrorData> {
        let CreateElicitationRequestParams::FormElicitationParams {
            message,
            requested_schema,
            ..
        } = request
        else {
            info!(server = %self.server_name, "Declining URL elicitation");
            return Ok(CreateElicitationResult {
                action: ElicitationAction::Decline,
                content: None,
            });
        };

        let Some(handler) = self.host.elicitation() else {
            return Err(rmcp::ErrorData::internal_error(
                "Elicitation not supported",
                None,
            ));
        };

        let schema = elicitation_schema_from_rmcp(&requested_schema)
            .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;
        let request = ElicitationRequest::new(message, schema).from_server(&self.server_name);

        match handler.handle(request).await {
            Ok(response) if response.approved => Ok(CreateElicitationResult {
                action: ElicitationAction::Accept,
                content: Some(Value::Object(response.data)),
            }),
            Ok(_) => Ok(CreateElicitationResult {
                action: ElicitationAction::Cancel,
                content: None,
            }),
            Err(e @ McpError::ValidationFailed { .. }) => {
                warn!(server = %self.server_name, error = %e, "Elicitation data rejected");
                Err(rmcp::ErrorData::invalid_params(e.to_string(), None))
            },
            Err(e) => Err(rmcp::ErrorData::internal_error(e.to_string(), None)),
        }
    }
}
