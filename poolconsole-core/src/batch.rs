use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, info_span};
use tracing_futures::Instrument;

use crate::error::{ConsoleError, CoreResult};
use crate::model::{Account, BatchEntry, BatchProgress, ModelId};
use crate::telemetry::{
    self, OperationTrace, KEY_ACCOUNT_ID, KEY_BATCH_INDEX, KEY_BATCH_TOTAL, KEY_OPERATION,
};
use crate::tester::SingleItemTester;

/// What a batch run does to each account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Test {
        model: Option<ModelId>,
        message: Option<String>,
    },
    Validate,
}

impl BatchOperation {
    /// Identifier-only test, as issued by test-all.
    pub fn test_all() -> Self {
        Self::Test {
            model: None,
            message: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Test { .. } => "test",
            Self::Validate => "validate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub operation: &'static str,
    pub succeeded: usize,
    pub total: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.succeeded, self.total)
    }
}

/// Runs one operation over a list of accounts, strictly one at a time.
///
/// Progress is published on a watch channel after every item. Item failures
/// are recorded and never stop the run.
pub struct SequentialBatchRunner {
    tester: SingleItemTester,
    progress: watch::Sender<BatchProgress>,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SequentialBatchRunner {
    pub fn new(tester: SingleItemTester) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            tester,
            progress,
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> BatchProgress {
        self.progress.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run `op` over `accounts` in order. Fails only when another run is in flight.
    pub async fn run(&self, accounts: &[Account], op: &BatchOperation) -> CoreResult<BatchSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConsoleError::Validation("batch run already in progress".into()));
        }
        let _guard = RunningGuard(&self.running);

        let total = accounts.len();
        self.progress.send_replace(BatchProgress::new(total));

        for (index, account) in accounts.iter().enumerate() {
            let account_id = account.identifier().unwrap_or_default();
            let span = info_span!(
                "batch_item",
                { KEY_OPERATION } = op.name(),
                { KEY_ACCOUNT_ID } = %account_id,
                { KEY_BATCH_INDEX } = index + 1,
                { KEY_BATCH_TOTAL } = total,
            );
            let entry = self.run_one(account_id, op).instrument(span).await;
            self.progress.send_modify(|p| p.push(entry));
        }

        let summary = BatchSummary {
            operation: op.name(),
            succeeded: self.progress.borrow().success_count(),
            total,
        };
        info!(
            operation = summary.operation,
            succeeded = summary.succeeded,
            total,
            "batch run complete"
        );
        Ok(summary)
    }

    async fn run_one(&self, account_id: &str, op: &BatchOperation) -> BatchEntry {
        let entry = if account_id.is_empty() {
            BatchEntry {
                account_id: String::new(),
                success: false,
                message: "account has neither email nor mobile".into(),
                elapsed_ms: None,
            }
        } else {
            match op {
                BatchOperation::Test { model, message } => {
                    let v = self.tester.test(account_id, *model, message.as_deref()).await;
                    BatchEntry {
                        account_id: account_id.to_string(),
                        success: v.success,
                        message: v.message,
                        elapsed_ms: v.elapsed_ms,
                    }
                }
                BatchOperation::Validate => {
                    let v = self.tester.validate(account_id).await;
                    BatchEntry {
                        account_id: account_id.to_string(),
                        success: v.valid,
                        message: v.message,
                        elapsed_ms: None,
                    }
                }
            }
        };

        let model = match op {
            BatchOperation::Test { model: Some(m), .. } => Some(m.as_str()),
            _ => None,
        };
        let mut trace = OperationTrace::new(op.name())
            .account_id_opt(Some(&entry.account_id).filter(|s| !s.is_empty()).map(String::as_str))
            .outcome(if entry.success { "ok" } else { "failed" })
            .latency_ms_opt(entry.elapsed_ms)
            .error_message_opt((!entry.success).then_some(entry.message.as_str()));
        if let Some(m) = model {
            trace = trace.model(m);
        }
        telemetry::emit(trace);
        entry
    }
}
