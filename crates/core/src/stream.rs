//! Streamed response assembly.
//!
//! Providers that stream tool calls do so loosely: argument fragments
//! arrive as plain text deltas, and the only structure is an optional
//! tool-name signal attached to some of them. The types in this module
//! reconstruct complete tool calls from that interleaving.

mod assembler;
mod buffer;
mod pipeline;

use serde_json::Value;

pub use assembler::{AssembleError, SignalOutcome, ToolCallAssembler};
pub use buffer::PartialJsonBuffer;
pub use pipeline::{
    PartialObjectPipeline, PipelineError, PipelineOutcome, SkipReason,
};

/// A fully assembled tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    /// The identifier minted for this call, stable across replays.
    pub id: String,
    /// The name of the tool to call.
    pub name: String,
    /// The assembled argument object.
    pub arguments: Value,
}
