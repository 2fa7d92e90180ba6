//! Incremental decoder for `data: <json>\n` completion streams.
//!
//! Network chunks do not line up with frame boundaries (or with UTF-8 character
//! boundaries), so the decoder keeps the unfinished tail of every fragment and
//! completes it with the next one.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde::Deserialize;
use tracing::debug;

use crate::error::CoreResult;
use crate::http_client::ByteStream;
use crate::stream::StreamEvent;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

// ---- Wire structs (only the fields the console reads) ----
#[derive(Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoningContent")]
    reasoning_content: Option<String>,
}

/// Push-based frame decoder. Feed fragments in arrival order, then call
/// [`FrameDecoder::finish`] once at end of stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: String,
    partial_utf8: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` was seen or `finish` was called. No further events follow.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes. An incomplete trailing UTF-8 sequence is held back.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.partial_utf8.extend_from_slice(chunk);
        let text = self.take_utf8();
        self.push_str(&text)
    }

    /// Feed an already-decoded text fragment.
    pub fn push_str(&mut self, fragment: &str) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.pending.push_str(fragment);
        while let Some(idx) = self.pending.find('\n') {
            let line = self.pending.drain(..=idx).collect::<String>();
            self.process_line(&line, &mut out);
            if self.done {
                self.pending.clear();
                break;
            }
        }
        out
    }

    /// End of stream: the held-back tail (if any) is processed once as a final segment.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if !self.partial_utf8.is_empty() {
            let tail = std::mem::take(&mut self.partial_utf8);
            self.pending.push_str(&String::from_utf8_lossy(&tail));
        }
        let tail = std::mem::take(&mut self.pending);
        if !tail.is_empty() {
            self.process_line(&tail, &mut out);
        }
        self.done = true;
        out
    }

    fn take_utf8(&mut self) -> String {
        let bytes = std::mem::take(&mut self.partial_utf8);
        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(n) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[n..];
                        }
                        // incomplete sequence at the end: wait for more bytes
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.partial_utf8 = rest.to_vec();
        out
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<StreamEvent>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim_start();
        if payload == DONE_SENTINEL {
            self.done = true;
            out.push(StreamEvent::Done);
            return;
        }
        match serde_json::from_str::<ChunkFrame>(payload) {
            Ok(frame) => {
                let Some(delta) = frame.choices.into_iter().next().and_then(|c| c.delta) else {
                    return;
                };
                if let Some(r) = delta.reasoning_content.filter(|s| !s.is_empty()) {
                    out.push(StreamEvent::ReasoningDelta(r));
                }
                if let Some(c) = delta.content.filter(|s| !s.is_empty()) {
                    out.push(StreamEvent::ContentDelta(c));
                }
            }
            Err(e) => {
                debug!(error = %e, payload, "skipping malformed stream frame");
                out.push(StreamEvent::Malformed(payload.to_string()));
            }
        }
    }
}

/// Adapt a raw byte stream into a stream of decoded events.
///
/// A transport error is yielded once and ends the stream. After `Done` the
/// inner stream is not polled again.
pub fn decode_stream(inner: ByteStream) -> EventStream {
    EventStream {
        inner,
        decoder: FrameDecoder::new(),
        queue: VecDeque::new(),
        finished: false,
    }
}

pub struct EventStream {
    inner: ByteStream,
    decoder: FrameDecoder,
    queue: VecDeque<StreamEvent>,
    finished: bool,
}

impl Stream for EventStream {
    type Item = CoreResult<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(ev) = this.queue.pop_front() {
                return Poll::Ready(Some(Ok(ev)));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.queue.extend(this.decoder.push_bytes(&chunk));
                    this.finished = this.decoder.is_done();
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.queue.extend(this.decoder.finish());
                    this.finished = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
