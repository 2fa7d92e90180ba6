/// Span/Log attribute keys for console operations.
/// Keep these stable; log queries filter on them.
pub const KEY_OPERATION: &str = "op.kind";
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_ACCOUNT_ID: &str = "account.id";
pub const KEY_TARGET: &str = "op.target";

pub const KEY_PHASE: &str = "completion.phase";
pub const KEY_STATUS_CODE: &str = "http.status";
pub const KEY_LATENCY_MS: &str = "latency.ms";

pub const KEY_BATCH_INDEX: &str = "batch.index";
pub const KEY_BATCH_TOTAL: &str = "batch.total";

pub const KEY_ERROR_KIND: &str = "error.kind";
