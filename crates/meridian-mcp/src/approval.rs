//! Approval seam for sampling.
//!
//! The core never talks to a user directly. Hosts with a UI implement
//! [`ApprovalSource`]; headless hosts use [`AutoApprove`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sampling::{SamplingRequest, SamplingResponse};

/// Decision returned by an approval source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Proceed.
    Approve,
    /// Do not proceed.
    Deny {
        /// Why the request was denied.
        reason: String,
    },
}

impl ApprovalDecision {
    /// Whether this decision lets the request proceed.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// Something that can approve or deny sampling traffic.
#[async_trait]
pub trait ApprovalSource: Send + Sync {
    /// Review a request before it is fulfilled.
    async fn review_request(&self, request: &SamplingRequest) -> ApprovalDecision;

    /// Review a generated response before it is returned.
    async fn review_response(
        &self,
        request: &SamplingRequest,
        response: &SamplingResponse,
    ) -> ApprovalDecision;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalSource for AutoApprove {
    async fn review_request(&self, _request: &SamplingRequest) -> ApprovalDecision {
        ApprovalDecision::Approve
    }

    async fn review_response(
        &self,
        _request: &SamplingRequest,
        _response: &SamplingResponse,
    ) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_approve() {
        let request = SamplingRequest::from_text("hi");
        let response = SamplingResponse::text("hello", "auto");
        assert!(AutoApprove.review_request(&request).await.is_approved());
        assert!(
            AutoApprove
                .review_response(&request, &response)
                .await
                .is_approved()
        );
    }

    #[test]
    fn test_decision_serde() {
        let deny = ApprovalDecision::Deny {
            reason: "no".into(),
        };
        let json = serde_json::to_value(&deny).unwrap();
        assert_eq!(json, serde_json::json!({"decision": "deny", "reason": "no"}));
        assert!(!deny.is_approved());
    }
}
