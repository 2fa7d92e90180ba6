use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::model::{ModelId, QueueSnapshot};

/// Body of `POST /admin/accounts/test`.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TestRequest<'a> {
    pub identifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct TestResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// Reasoning text, returned for reasoner models.
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default, alias = "responseTimeMs", alias = "response_time_ms")]
    pub response_time: Option<u64>,
    /// HTTP status of the test call; filled in by the client, not the body.
    #[serde(skip)]
    pub status_code: Option<u16>,
}

/// Body of `POST /admin/accounts/validate`.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ValidateRequest<'a> {
    pub identifier: &'a str,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(default)]
    pub message: String,
}

/// One-shot account checks against the admin API.
#[async_trait]
pub trait AccountProbe: Send + Sync {
    async fn test_account(
        &self,
        identifier: &str,
        model: Option<ModelId>,
        message: Option<&str>,
    ) -> CoreResult<TestResponse>;

    async fn validate_account(&self, identifier: &str) -> CoreResult<ValidateResponse>;
}

/// Source of queue-status snapshots for the poller.
#[async_trait]
pub trait QueueSource: Send + Sync {
    async fn queue_status(&self) -> CoreResult<QueueSnapshot>;
}
