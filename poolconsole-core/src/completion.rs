//! Streaming test client for chat completions.
//!
//! One [`CompletionHandle`] per request. The request runs on its own task and
//! publishes a fresh [`CompletionResult`] snapshot after every applied delta,
//! so callers can render progress without blocking. Lifecycle:
//! `Pending -> Streaming* -> (Finished | Aborted | Errored)`; once terminal,
//! the result never changes again.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures_util::stream::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Span};
use tracing_futures::Instrument;

use crate::decoder::decode_stream;
use crate::error::{ConsoleError, CoreResult};
use crate::http_client::{ByteStream, HttpClient, RequestCtx};
use crate::model::{
    ApiKey, ChatMessage, CompletionRequest, CompletionResult, ModelId, Phase, Role, TargetMode,
};
use crate::normalizer::normalize_request;
use crate::probe::AccountProbe;
use crate::stream::StreamEvent;
use crate::telemetry::{
    self, OperationTrace, KEY_ERROR_KIND, KEY_LATENCY_MS, KEY_MODEL, KEY_PHASE, KEY_STATUS_CODE,
    KEY_TARGET,
};

#[derive(Serialize)]
struct DirectChatReq {
    model: ModelId,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Starts completion sessions against the direct endpoint or an account.
#[derive(Clone)]
pub struct CompletionClient {
    http: HttpClient,
    base: String,
    pool_keys: Vec<ApiKey>,
    probe: Option<Arc<dyn AccountProbe>>,
}

impl CompletionClient {
    pub fn new(http: HttpClient, base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            pool_keys: Vec::new(),
            probe: None,
        }
    }

    /// Keys used, first one wins, when a request carries no explicit key.
    pub fn with_pool_keys(mut self, keys: Vec<ApiKey>) -> Self {
        self.pool_keys = keys;
        self
    }

    /// Admin-side probe used for account-scoped requests.
    pub fn with_probe(mut self, probe: Arc<dyn AccountProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Explicit key, else the first non-empty pool key.
    fn resolve_key(&self, explicit: Option<ApiKey>) -> CoreResult<ApiKey> {
        explicit
            .or_else(|| self.pool_keys.iter().find(|k| !k.is_empty()).cloned())
            .ok_or_else(|| {
                ConsoleError::MissingCredential(
                    "no API key provided and the key pool is empty".into(),
                )
            })
    }

    /// Open exactly one request and return its handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, request: CompletionRequest) -> CoreResult<CompletionHandle> {
        let request = normalize_request(request)?;
        match request.target {
            TargetMode::Direct => {
                let key = self.resolve_key(request.api_key)?;
                let http = self.http.clone();
                let url = format!("{}/v1/chat/completions", self.base);
                let body = DirectChatReq {
                    model: request.model,
                    messages: vec![ChatMessage {
                        role: Role::User,
                        content: request.message,
                    }],
                    stream: true,
                };
                let bearer = key.bearer();
                debug!(key = %key.preview(), model = %request.model, "opening completion stream");
                Ok(spawn_direct(request.model, async move {
                    let ctx = RequestCtx {
                        bearer: Some(&bearer),
                        ..Default::default()
                    };
                    http.post_stream(&url, &body, &ctx).await
                }))
            }
            TargetMode::AccountScoped { identifier } => {
                if identifier.is_empty() {
                    return Err(ConsoleError::MissingCredential("no account selected".into()));
                }
                let probe = self.probe.clone().ok_or_else(|| {
                    ConsoleError::MissingCredential("account tests need an admin client".into())
                })?;
                Ok(spawn_account(probe, identifier, request.model, request.message))
            }
        }
    }
}

/// Caller-side view of one running completion.
pub struct CompletionHandle {
    rx: watch::Receiver<CompletionResult>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CompletionHandle {
    /// Latest accumulated state.
    pub fn snapshot(&self) -> CompletionResult {
        self.rx.borrow().clone()
    }

    /// Receiver notified after every applied delta and on the terminal transition.
    pub fn subscribe(&self) -> watch::Receiver<CompletionResult> {
        self.rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.rx.borrow().finished()
    }

    /// Request cancellation. No-op once the session is terminal.
    pub fn cancel(&self) {
        if !self.is_finished() {
            self.token.cancel();
        }
    }

    /// Wait for the terminal state and return it.
    pub async fn wait(mut self) -> CompletionResult {
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "completion task did not run to completion");
            let mut result = self.snapshot();
            if !result.finished() {
                result.phase = Phase::Errored;
                result.success = false;
                result.error_message = Some(format!("completion task failed: {e}"));
            }
            return result;
        }
        self.snapshot()
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        // dropping the handle releases the connection of an unfinished session
        self.token.cancel();
    }
}

/// Apply `f` unless the result is already terminal. Returns whether it applied.
fn apply(tx: &watch::Sender<CompletionResult>, f: impl FnOnce(&mut CompletionResult)) -> bool {
    tx.send_if_modified(|r| {
        if r.finished() {
            return false;
        }
        f(r);
        true
    })
}

fn terminate(
    tx: &watch::Sender<CompletionResult>,
    phase: Phase,
    error: Option<&ConsoleError>,
    elapsed_ms: Option<u64>,
) {
    apply(tx, |r| {
        r.phase = phase;
        if phase != Phase::Finished {
            r.success = false;
        }
        if let Some(e) = error {
            r.error_message = Some(e.to_string());
            if let ConsoleError::Protocol { status, .. } = e {
                r.status_code = Some(*status);
            }
        }
        if elapsed_ms.is_some() {
            r.elapsed_ms = elapsed_ms;
        }
    });
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Pending => "pending",
        Phase::Streaming => "streaming",
        Phase::Finished => "finished",
        Phase::Aborted => "aborted",
        Phase::Errored => "errored",
    }
}

/// Close out the session span and emit its record.
fn emit_trace(
    op: &str,
    model: ModelId,
    account: Option<&str>,
    result: &CompletionResult,
    error: Option<&ConsoleError>,
) {
    let span = Span::current();
    span.record(KEY_PHASE, phase_label(result.phase));
    if let Some(code) = result.status_code {
        span.record(KEY_STATUS_CODE, code);
    }
    if let Some(ms) = result.elapsed_ms {
        span.record(KEY_LATENCY_MS, ms);
    }
    if let Some(e) = error {
        span.record(KEY_ERROR_KIND, e.kind());
    }
    telemetry::emit(
        OperationTrace::new(op)
            .model(model.as_str())
            .account_id_opt(account)
            .outcome(phase_label(result.phase))
            .status_code_opt(result.status_code)
            .latency_ms_opt(result.elapsed_ms)
            .chars(result.content.chars().count() + result.reasoning_content.chars().count())
            .error_kind_opt(error.map(ConsoleError::kind))
            .error_message_opt(result.error_message.as_deref()),
    );
}

fn new_session() -> (
    watch::Sender<CompletionResult>,
    watch::Receiver<CompletionResult>,
    CancellationToken,
) {
    let (tx, rx) = watch::channel(CompletionResult::default());
    (tx, rx, CancellationToken::new())
}

/// Spawn a streamed session. `open` sends the request and resolves once
/// response headers arrive.
pub(crate) fn spawn_direct<F>(model: ModelId, open: F) -> CompletionHandle
where
    F: Future<Output = CoreResult<(u16, ByteStream)>> + Send + 'static,
{
    let (tx, rx, token) = new_session();
    let cancel = token.clone();
    let span = info_span!(
        "completion",
        { KEY_TARGET } = "direct",
        { KEY_MODEL } = %model,
        { KEY_PHASE } = tracing::field::Empty,
        { KEY_STATUS_CODE } = tracing::field::Empty,
        { KEY_LATENCY_MS } = tracing::field::Empty,
        { KEY_ERROR_KIND } = tracing::field::Empty,
    );
    let task = tokio::spawn(
        async move {
            let start = Instant::now();
            let elapsed = || Some(start.elapsed().as_millis() as u64);

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = open => Some(r),
            };
            let error = match opened {
                None => {
                    terminate(&tx, Phase::Aborted, None, elapsed());
                    Some(ConsoleError::Cancelled)
                }
                Some(Err(e)) => {
                    terminate(&tx, Phase::Errored, Some(&e), elapsed());
                    Some(e)
                }
                Some(Ok((status, body))) => {
                    apply(&tx, |r| {
                        r.status_code = Some(status);
                        r.success = true;
                        r.phase = Phase::Streaming;
                    });
                    let (phase, error) = drive_events(decode_stream(body), &cancel, &tx).await;
                    terminate(&tx, phase, error.as_ref(), elapsed());
                    error.or((phase == Phase::Aborted).then_some(ConsoleError::Cancelled))
                }
            };
            emit_trace("completion", model, None, &tx.borrow(), error.as_ref());
        }
        .instrument(span),
    );
    CompletionHandle { rx, token, task }
}

/// Apply decoded events until `Done`, end of body, an error, or cancellation.
/// Returns the terminal phase; the event stream (and its connection) is
/// dropped on return.
async fn drive_events<S>(
    mut events: S,
    cancel: &CancellationToken,
    tx: &watch::Sender<CompletionResult>,
) -> (Phase, Option<ConsoleError>)
where
    S: Stream<Item = CoreResult<StreamEvent>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (Phase::Aborted, None),
            ev = events.next() => ev,
        };
        match next {
            Some(Ok(StreamEvent::ContentDelta(text))) => {
                apply(tx, |r| r.content.push_str(&text));
            }
            Some(Ok(StreamEvent::ReasoningDelta(text))) => {
                apply(tx, |r| r.reasoning_content.push_str(&text));
            }
            Some(Ok(StreamEvent::Malformed(raw))) => {
                debug!(payload = %raw, "ignoring malformed frame");
            }
            Some(Ok(StreamEvent::Done)) | None => return (Phase::Finished, None),
            Some(Err(e)) => return (Phase::Errored, Some(e)),
        }
    }
}

/// Spawn an account-scoped session: one admin test call, populated atomically.
fn spawn_account(
    probe: Arc<dyn AccountProbe>,
    identifier: String,
    model: ModelId,
    message: String,
) -> CompletionHandle {
    let (tx, rx, token) = new_session();
    let cancel = token.clone();
    let span = info_span!(
        "completion",
        { KEY_TARGET } = "account",
        { KEY_MODEL } = %model,
        { KEY_PHASE } = tracing::field::Empty,
        { KEY_STATUS_CODE } = tracing::field::Empty,
        { KEY_LATENCY_MS } = tracing::field::Empty,
        { KEY_ERROR_KIND } = tracing::field::Empty,
    );
    let task = tokio::spawn(
        async move {
            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = probe.test_account(&identifier, Some(model), Some(&message)) => Some(r),
            };
            let error = match outcome {
                None => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    terminate(&tx, Phase::Aborted, None, Some(elapsed));
                    Some(ConsoleError::Cancelled)
                }
                Some(Ok(resp)) => {
                    apply(&tx, |r| {
                        r.success = resp.success;
                        r.status_code = resp.status_code;
                        r.elapsed_ms = resp.response_time;
                        if let Some(thinking) = resp.thinking {
                            r.reasoning_content = thinking;
                        }
                        if resp.success {
                            r.content = resp.message;
                        } else {
                            r.error_message = Some(resp.message);
                        }
                        r.phase = if resp.success { Phase::Finished } else { Phase::Errored };
                    });
                    None
                }
                Some(Err(e)) => {
                    terminate(&tx, Phase::Errored, Some(&e), None);
                    Some(e)
                }
            };
            emit_trace("completion", model, Some(&identifier), &tx.borrow(), error.as_ref());
        }
        .instrument(span),
    );
    CompletionHandle { rx, token, task }
}
