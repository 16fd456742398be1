//! Core logic including the agent loop, streamed tool-call assembly,
//! continuation criteria and tool execution.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod continuation;
pub mod conversation;
pub mod event;
mod model_client;
pub mod stream;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, AgentError, Budget, DEFAULT_MAX_STEPS, Step,
    ToolChoice,
};
