//! Streaming primitives produced by the frame decoder.
//!
//! Contract:
//! - A stream yields 0..n `ContentDelta` / `ReasoningDelta` / `Malformed` events in arrival order.
//! - `Done` is terminal. After it, no further events are emitted.
//! - `Malformed` is a warning about one frame; the stream continues after it.

/// One decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Partial answer text.
    ContentDelta(String),
    /// Partial reasoning text (reasoner models only).
    ReasoningDelta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// A `data:` payload that failed to parse. Carries the raw payload.
    Malformed(String),
}
