use std::fmt::{self, Display, Formatter};

use serde_json::{Value, json};

use crate::stream::{PartialJsonBuffer, ToolCall};

/// Reconstructs complete tool calls from loose tool-name signals and
/// the caller-owned argument buffer.
///
/// The assembler never mutates the buffer. When a signal closes the
/// active call, the returned [`SignalOutcome`] asks the caller to reset
/// the buffer before feeding further argument fragments.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<ToolCall>,
    active: Option<String>,
    next_id: usize,
}

/// What a tool-name signal did to the assembler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalOutcome {
    /// A new call was started by this signal.
    pub started: bool,
    /// The signal closed a call boundary; the caller must reset the
    /// argument buffer before pushing more fragments.
    pub requires_reset: bool,
}

/// The error for a stream that ended without any started tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembleError;

impl Display for AssembleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "the stream ended without any tool call")
    }
}

impl std::error::Error for AssembleError {}

impl ToolCallAssembler {
    /// Creates an assembler with no started calls.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name of the call currently being assembled.
    #[inline]
    pub fn active_call(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Returns how many calls have been started so far, including the
    /// active one.
    #[inline]
    pub fn started_calls(&self) -> usize {
        self.calls.len() + usize::from(self.active.is_some())
    }

    /// Returns the calls finalized so far, in emission order.
    #[inline]
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    /// Feeds a tool-name signal.
    ///
    /// Providers repeat the name of the active call on argument
    /// fragments; such a repetition with an empty buffer is a no-op
    /// and must not create a second call. A different name, or the
    /// same name arriving when arguments are already buffered, closes
    /// the active call with whatever the buffer holds and starts a
    /// new one. A call that is closed before any argument fragment
    /// arrived is a ghost and is dropped.
    pub fn on_signal(
        &mut self,
        name: &str,
        buffer: &PartialJsonBuffer,
    ) -> SignalOutcome {
        match &self.active {
            None => {
                self.active = Some(name.to_owned());
                SignalOutcome {
                    started: true,
                    requires_reset: false,
                }
            }
            Some(active) if active == name && buffer.is_empty() => {
                SignalOutcome {
                    started: false,
                    requires_reset: false,
                }
            }
            Some(_) => {
                if buffer.is_empty() {
                    // The previous signal never received arguments,
                    // drop the ghost instead of recording an empty
                    // call.
                    self.active = None;
                } else {
                    self.finalize_active(buffer);
                }
                self.active = Some(name.to_owned());
                SignalOutcome {
                    started: true,
                    requires_reset: true,
                }
            }
        }
    }

    /// Closes the stream, finalizing the active call from the buffered
    /// arguments.
    ///
    /// Returns the assembled calls in the order the provider emitted
    /// them. Errors when no call was ever started.
    pub fn finish(
        mut self,
        buffer: &PartialJsonBuffer,
    ) -> Result<Vec<ToolCall>, AssembleError> {
        if self.active.is_some() {
            self.finalize_active(buffer);
        }
        if self.calls.is_empty() {
            return Err(AssembleError);
        }
        Ok(self.calls)
    }

    fn finalize_active(&mut self, buffer: &PartialJsonBuffer) {
        let Some(name) = self.active.take() else {
            return;
        };
        let arguments = buffer.value().unwrap_or_else(|| json!({}));
        self.next_id += 1;
        self.calls.push(ToolCall {
            id: format!("call_{}", self.next_id),
            name,
            arguments,
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_single_call_assembly() {
        let mut buffer = PartialJsonBuffer::new();
        let mut assembler = ToolCallAssembler::new();

        let outcome = assembler.on_signal("read_file", &buffer);
        assert!(outcome.started);
        assert!(!outcome.requires_reset);

        buffer.push(r#"{"filename": "#);
        buffer.push(r#""todo.txt"}"#);

        let calls = assembler.finish(&buffer).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, json!({ "filename": "todo.txt" }));
    }

    #[test]
    fn test_repeated_signal_with_empty_buffer_is_noop() {
        let buffer = PartialJsonBuffer::new();
        let mut assembler = ToolCallAssembler::new();

        assembler.on_signal("read_file", &buffer);
        let outcome = assembler.on_signal("read_file", &buffer);
        assert!(!outcome.started);
        assert!(!outcome.requires_reset);
        assert_eq!(assembler.started_calls(), 1);
    }

    #[test]
    fn test_duplicate_start_then_new_call() {
        // [start(A), delta, delta, duplicate-start(A), start(B), delta]
        // assembles exactly two calls, A then B, with A's arguments
        // reflecting only the deltas received before B started.
        let mut buffer = PartialJsonBuffer::new();
        let mut assembler = ToolCallAssembler::new();

        assembler.on_signal("alpha", &buffer);
        buffer.push(r#"{"a""#);
        buffer.push(r#": 1}"#);
        let outcome = assembler.on_signal("alpha", &buffer);
        assert!(outcome.requires_reset);
        buffer.reset();
        let outcome = assembler.on_signal("beta", &buffer);
        assert!(outcome.requires_reset);
        buffer.reset();
        buffer.push(r#"{"b": 2}"#);

        let calls = assembler.finish(&buffer).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "alpha");
        assert_eq!(calls[0].arguments, json!({"a": 1}));
        assert_eq!(calls[1].name, "beta");
        assert_eq!(calls[1].arguments, json!({"b": 2}));
        assert_eq!(
            calls.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            ["call_1", "call_2"],
        );
    }

    #[test]
    fn test_boundary_finalizes_previous_call() {
        let mut buffer = PartialJsonBuffer::new();
        let mut assembler = ToolCallAssembler::new();

        assembler.on_signal("alpha", &buffer);
        buffer.push(r#"{"x": 1}"#);
        let outcome = assembler.on_signal("beta", &buffer);
        assert!(outcome.started);
        assert!(outcome.requires_reset);
        buffer.reset();
        buffer.push(r#"{"x": 2}"#);

        let calls = assembler.finish(&buffer).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "alpha");
        assert_eq!(calls[0].arguments, json!({"x": 1}));
        assert_eq!(calls[1].name, "beta");
        assert_eq!(calls[1].arguments, json!({"x": 2}));
    }

    #[test]
    fn test_stream_end_finalizes_with_truncated_arguments() {
        let mut buffer = PartialJsonBuffer::new();
        let mut assembler = ToolCallAssembler::new();

        assembler.on_signal("alpha", &buffer);
        buffer.push(r#"{"path": "/tmp/fi"#);

        let calls = assembler.finish(&buffer).unwrap();
        assert_eq!(calls[0].arguments, json!({"path": "/tmp/fi"}));
    }

    #[test]
    fn test_finish_without_calls_is_an_error() {
        let buffer = PartialJsonBuffer::new();
        let assembler = ToolCallAssembler::new();
        assert_eq!(assembler.finish(&buffer), Err(AssembleError));
    }

    #[test]
    fn test_unparsable_buffer_defaults_to_empty_arguments() {
        let mut buffer = PartialJsonBuffer::new();
        let mut assembler = ToolCallAssembler::new();

        assembler.on_signal("alpha", &buffer);
        buffer.push("not json at all");

        let calls = assembler.finish(&buffer).unwrap();
        assert_eq!(calls[0].arguments, json!({}));
    }
}
