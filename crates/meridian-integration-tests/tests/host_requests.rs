//! Sampling and elicitation, from the host and from servers.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{MockLauncher, mock_server, offline_config};
use meridian_mcp::{
    ApprovalDecision, ApprovalSource, ElicitationRequest, ElicitationSchema, InputOutcome,
    InputSource, McpError, Orchestrator, OrchestratorBuilder, PropertySchema, PropertyType,
    SamplingRequest, SamplingResponse, ServerConfig,
};
use serde_json::{Map, Value, json};

struct DenyAll;

#[async_trait]
impl ApprovalSource for DenyAll {
    async fn review_request(&self, _request: &SamplingRequest) -> ApprovalDecision {
        ApprovalDecision::Deny {
            reason: "not today".to_string(),
        }
    }

    async fn review_response(
        &self,
        _request: &SamplingRequest,
        _response: &SamplingResponse,
    ) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

struct Scripted(InputOutcome);

#[async_trait]
impl InputSource for Scripted {
    async fn collect(&self, _request: &ElicitationRequest) -> InputOutcome {
        self.0.clone()
    }
}

fn builder(servers: Vec<ServerConfig>) -> (OrchestratorBuilder, Arc<MockLauncher>) {
    let launcher = MockLauncher::new();
    let builder = Orchestrator::builder(offline_config(servers)).launcher(launcher.clone());
    (builder, launcher)
}

fn approve_schema() -> ElicitationSchema {
    ElicitationSchema::new().required_property(
        "approve",
        PropertySchema::new(PropertyType::Boolean).with_default(true),
    )
}

#[tokio::test]
async fn test_sample_requires_connected_inference_server() {
    let (builder, _launcher) = builder(vec![mock_server("alpha")]);
    let host = builder.build().unwrap();
    host.initialize().await;

    let err = host
        .sample(SamplingRequest::from_text("hello"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::InferenceServerUnavailable { ref server } if server == "inference"));
    assert!(err.to_string().contains("inference"));

    host.shutdown().await;
}

#[tokio::test]
async fn test_sample_through_inference_server() {
    let (builder, launcher) = builder(vec![mock_server("inference")]);
    let host = builder.build().unwrap();
    host.initialize().await;

    let request = SamplingRequest::from_text("hi")
        .with_system_prompt("Be brief")
        .with_metadata("trace", "abc");
    let response = host.sample(request, None).await.unwrap().unwrap();

    assert_eq!(response.content, "Be brief\n\nUser: hi");
    assert_eq!(response.model, "mock-llm");
    assert_eq!(response.metadata.get("trace"), Some(&json!("abc")));
    assert_eq!(response.metadata.get("inference_server"), Some(&json!("inference")));
    assert_eq!(launcher.state("inference").unwrap().request_count("tools/call"), 1);

    host.shutdown().await;
}

#[tokio::test]
async fn test_denied_sample_returns_none_without_traffic() {
    let (builder, launcher) = builder(vec![mock_server("inference")]);
    let host = builder.approval_source(Arc::new(DenyAll)).build().unwrap();
    host.initialize().await;

    let response = host.sample(SamplingRequest::from_text("hi"), None).await.unwrap();
    assert!(response.is_none());
    assert_eq!(launcher.state("inference").unwrap().request_count("tools/call"), 0);

    host.shutdown().await;
}

#[tokio::test]
async fn test_server_initiated_sampling() {
    let (builder, _launcher) = builder(vec![mock_server("alpha"), mock_server("inference")]);
    let host = builder.build().unwrap();
    host.initialize().await;

    let result = host
        .call_tool("alpha", "summarize", json!({}), None)
        .await
        .unwrap();
    assert_eq!(result.text_content(), "User: Summarize this");

    host.shutdown().await;
}

#[tokio::test]
async fn test_sample_timeout_keeps_inference_server_usable() {
    let (builder, _launcher) = builder(vec![mock_server("inference")]);
    let host = builder.build().unwrap();
    host.initialize().await;

    let err = host
        .sample(
            SamplingRequest::from_text("slow please"),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, McpError::Timeout { timeout_ms: 100, .. }));
    assert!(host.is_connected("inference").await);

    let response = host
        .sample(SamplingRequest::from_text("hi"), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.content, "User: hi");

    host.shutdown().await;
}

#[tokio::test]
async fn test_sampling_from_busy_inference_server_fails_fast() {
    let (builder, _launcher) = builder(vec![mock_server("alpha"), mock_server("inference")]);
    let host = builder.build().unwrap();
    host.initialize().await;

    let started = Instant::now();
    let result = host
        .call_tool("inference", "summarize", json!({}), Some(Duration::from_secs(3)))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let text = result.text_content();
    assert!(text.starts_with("error:"), "{text}");
    assert!(text.contains("inference"), "{text}");

    // The connection is free again once the call returns.
    let ok = host
        .call_tool("inference", "echo", json!({"text": "free"}), None)
        .await
        .unwrap();
    assert_eq!(ok.text_content(), "free");

    host.shutdown().await;
}

#[tokio::test]
async fn test_server_initiated_sampling_denied() {
    let (builder, launcher) = builder(vec![mock_server("alpha"), mock_server("inference")]);
    let host = builder.approval_source(Arc::new(DenyAll)).build().unwrap();
    host.initialize().await;

    let result = host
        .call_tool("alpha", "summarize", json!({}), None)
        .await
        .unwrap();
    assert!(result.text_content().starts_with("error:"));
    assert_eq!(launcher.state("inference").unwrap().request_count("tools/call"), 0);

    host.shutdown().await;
}

#[tokio::test]
async fn test_trusted_server_skips_approval() {
    let (builder, _launcher) = builder(vec![
        mock_server("alpha").trusted(),
        mock_server("inference"),
    ]);
    let host = builder.approval_source(Arc::new(DenyAll)).build().unwrap();
    host.initialize().await;

    let result = host
        .call_tool("alpha", "summarize", json!({}), None)
        .await
        .unwrap();
    assert_eq!(result.text_content(), "User: Summarize this");

    host.shutdown().await;
}

#[tokio::test]
async fn test_elicit_without_input_source_uses_defaults() {
    let (builder, _launcher) = builder(Vec::new());
    let host = builder.build().unwrap();

    let response = host.elicit("Approve?", approve_schema()).await.unwrap();
    assert!(response.approved);
    assert_eq!(response.data.get("approve"), Some(&Value::Bool(true)));
    assert!(response.cancellation_reason.is_none());
}

#[tokio::test]
async fn test_elicit_rejects_invalid_enum_value() {
    let mut submitted = Map::new();
    submitted.insert("status".to_string(), json!("c"));
    let (builder, _launcher) = builder(Vec::new());
    let host = builder
        .input_source(Arc::new(Scripted(InputOutcome::Submitted(submitted))))
        .build()
        .unwrap();

    let schema = ElicitationSchema::new().required_property(
        "status",
        PropertySchema::new(PropertyType::String).with_enum(["a", "b"]),
    );
    let err = host.elicit("Pick one", schema).await.unwrap_err();
    match err {
        McpError::ValidationFailed { errors } => {
            assert!(errors.iter().any(|e| e.contains("status")));
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_server_initiated_elicitation() {
    let (builder, _launcher) = builder(vec![mock_server("alpha")]);
    let host = builder.build().unwrap();
    host.initialize().await;

    let result = host.call_tool("alpha", "ask", json!({}), None).await.unwrap();
    let answer: Value = serde_json::from_str(&result.text_content()).unwrap();
    assert_eq!(answer["action"], "accept");
    assert_eq!(answer["content"]["approve"], true);

    host.shutdown().await;
}

#[tokio::test]
async fn test_server_initiated_elicitation_cancelled() {
    let (builder, _launcher) = builder(vec![mock_server("alpha")]);
    let host = builder
        .input_source(Arc::new(Scripted(InputOutcome::Cancelled {
            reason: "dismissed".to_string(),
        })))
        .build()
        .unwrap();
    host.initialize().await;

    let result = host.call_tool("alpha", "ask", json!({}), None).await.unwrap();
    let answer: Value = serde_json::from_str(&result.text_content()).unwrap();
    assert_eq!(answer["action"], "cancel");

    host.shutdown().await;
}

#[tokio::test]
async fn test_server_initiated_elicitation_invalid_data() {
    let mut submitted = Map::new();
    submitted.insert("approve".to_string(), json!("yes"));
    let (builder, _launcher) = builder(vec![mock_server("alpha")]);
    let host = builder
        .input_source(Arc::new(Scripted(InputOutcome::Submitted(submitted))))
        .build()
        .unwrap();
    host.initialize().await;

    let result = host.call_tool("alpha", "ask", json!({}), None).await.unwrap();
    let text = result.text_content();
    assert!(text.starts_with("error:"), "got {text}");
    assert!(text.contains("approve"));

    host.shutdown().await;
}
