//! The event sink contract.
//!
//! Dispatch is fire-and-forget: the loop behaves identically whether
//! events are observed or dropped, so [`NullSink`] is a valid sink.

use serde::Serialize;
use serde_json::Value;

/// A fire-and-forget receiver of agent events.
pub trait EventSink: Send + Sync {
    /// Dispatches one event. Must not block the loop.
    fn dispatch(&self, event: AgentEvent);
}

/// A sink that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    #[inline]
    fn dispatch(&self, _event: AgentEvent) {}
}

impl<F> EventSink for F
where
    F: Fn(AgentEvent) + Send + Sync,
{
    #[inline]
    fn dispatch(&self, event: AgentEvent) {
        self(event);
    }
}

/// A notable moment in the loop's execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A fragment of the assistant's text response was received.
    PartialResponse {
        /// The text fragment.
        delta: String,
    },
    /// A streamed tool call started assembling.
    StreamedToolCallStarted {
        /// The signaled tool name.
        name: String,
    },
    /// A streamed tool call's partial arguments changed.
    StreamedToolCallUpdated {
        /// The tool name.
        name: String,
        /// The current best-effort argument object.
        arguments: Value,
    },
    /// A streamed tool call was finalized.
    StreamedToolCallCompleted {
        /// The minted call identifier.
        id: String,
        /// The tool name.
        name: String,
    },
    /// A tool execution started.
    ToolCallStarted {
        /// The call identifier.
        id: String,
        /// The tool name.
        name: String,
    },
    /// A tool execution completed.
    ToolCallCompleted {
        /// The tool name.
        name: String,
        /// Whether the execution succeeded.
        success: bool,
        /// The normalized error string of a failed execution.
        error: Option<String>,
        /// RFC 3339 start timestamp.
        started_at: String,
        /// RFC 3339 end timestamp.
        ended_at: String,
    },
}
