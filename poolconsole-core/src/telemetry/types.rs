use serde::{Deserialize, Serialize};

/// One finished console operation: a completion session or a single batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OperationTrace {
    /// "completion", "test" or "validate".
    pub operation: Option<String>,

    /// Model identifier, e.g. "deepseek-chat".
    pub model: Option<String>,

    /// Account identity key, for account-scoped operations.
    pub account_id: Option<String>,

    /// Terminal outcome: "finished", "aborted", "errored", "ok", "failed".
    pub outcome: Option<String>,

    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,

    /// Characters accumulated (content + reasoning) for streamed completions.
    pub chars: Option<usize>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl OperationTrace {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: Some(operation.to_string()),
            ..Default::default()
        }
    }
    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }
    pub fn account_id_opt(mut self, id: Option<&str>) -> Self {
        self.account_id = id.map(|s| s.to_string());
        self
    }
    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }
    pub fn status_code_opt(mut self, code: Option<u16>) -> Self {
        self.status_code = code;
        self
    }
    pub fn latency_ms_opt(mut self, ms: Option<u64>) -> Self {
        self.latency_ms = ms;
        self
    }
    pub fn chars(mut self, n: usize) -> Self {
        self.chars = Some(n);
        self
    }
    pub fn error_kind_opt(mut self, kind: Option<&str>) -> Self {
        self.error_kind = kind.map(|s| s.to_string());
        self
    }
    pub fn error_message_opt(mut self, msg: Option<&str>) -> Self {
        self.error_message = msg.map(|s| s.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_trace_serializes() {
        let trace = OperationTrace::new("test")
            .model("deepseek-chat")
            .account_id_opt(Some("a@example.com"))
            .outcome("failed")
            .latency_ms_opt(Some(42))
            .error_kind_opt(Some("transport"))
            .error_message_opt(Some("connection refused"));

        let as_json = serde_json::to_value(&trace).unwrap();
        assert_eq!(as_json["operation"], json!("test"));
        assert_eq!(as_json["account_id"], json!("a@example.com"));
        assert_eq!(as_json["latency_ms"], json!(42));
        assert_eq!(as_json["error_kind"], json!("transport"));
        assert_eq!(as_json["chars"], json!(null));
    }
}
