use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// Only user turns are sent; the console never replays history.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Models the upstream service exposes to the console.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelId {
    #[default]
    #[serde(rename = "deepseek-chat")]
    Chat,
    #[serde(rename = "deepseek-reasoner")]
    Reasoner,
}

impl ModelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "deepseek-chat",
            Self::Reasoner => "deepseek-reasoner",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deepseek-chat" | "chat" => Ok(Self::Chat),
            "deepseek-reasoner" | "reasoner" => Ok(Self::Reasoner),
            other => Err(ConsoleError::Validation(format!("unknown model '{other}'"))),
        }
    }
}

/// One upstream account as reported by the admin store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Account {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, alias = "tokenPreview", skip_serializing_if = "Option::is_none")]
    pub token_preview: Option<String>,
    #[serde(default, alias = "hasToken")]
    pub has_token: bool,
}

impl Account {
    /// Identity key: email if present, else mobile.
    pub fn identifier(&self) -> Option<&str> {
        non_empty(self.email.as_deref()).or_else(|| non_empty(self.mobile.as_deref()))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.is_empty())
}

/// API credential. Only the redacted preview is ever displayed.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    const PREVIEW_CHARS: usize = 16;

    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    pub fn preview(&self) -> String {
        let head: String = self
            .0
            .expose_secret()
            .chars()
            .take(Self::PREVIEW_CHARS)
            .collect();
        format!("{head}****")
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.0.expose_secret())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.preview()).finish()
    }
}

/// Keys and accounts as held by the external store.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PoolSnapshot {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl PoolSnapshot {
    pub fn api_keys(&self) -> Vec<ApiKey> {
        self.keys.iter().map(ApiKey::new).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMode {
    /// Public completion endpoint, streamed.
    Direct,
    /// Admin test endpoint scoped to one account, single-shot.
    AccountScoped { identifier: String },
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: ModelId,
    pub message: String,
    pub target: TargetMode,
    pub api_key: Option<ApiKey>,
}

impl CompletionRequest {
    pub fn direct(model: ModelId, message: impl Into<String>) -> Self {
        Self {
            model,
            message: message.into(),
            target: TargetMode::Direct,
            api_key: None,
        }
    }

    pub fn for_account(
        model: ModelId,
        message: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            model,
            message: message.into(),
            target: TargetMode::AccountScoped {
                identifier: identifier.into(),
            },
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: ApiKey) -> Self {
        self.api_key = Some(key);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Pending,
    Streaming,
    Finished,
    Aborted,
    Errored,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Errored)
    }
}

/// Running or final outcome of one completion session.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct CompletionResult {
    pub content: String,
    pub reasoning_content: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub elapsed_ms: Option<u64>,
    pub phase: Phase,
}

impl CompletionResult {
    pub fn finished(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn aborted(&self) -> bool {
        self.phase == Phase::Aborted
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub account_id: String,
    pub success: bool,
    pub message: String,
    pub elapsed_ms: Option<u64>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub results: Vec<BatchEntry>,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            current: 0,
            total,
            results: Vec::with_capacity(total),
        }
    }

    pub fn push(&mut self, entry: BatchEntry) {
        self.results.push(entry);
        self.current = self.results.len();
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn is_complete(&self) -> bool {
        self.current == self.total
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub available: u32,
    #[serde(alias = "inUse")]
    pub in_use: u32,
    pub total: u32,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct TestVerdict {
    pub success: bool,
    pub message: String,
    pub elapsed_ms: Option<u64>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ValidateVerdict {
    pub valid: bool,
    pub message: String,
}
