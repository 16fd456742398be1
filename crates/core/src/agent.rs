//! The agent loop.

mod builder;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, Instant};

use stepwise_model::{
    FinishReason, ModelProviderError, ModelRequest, ToolObservation, Usage,
};

use crate::continuation::criteria::ConfigError;
use crate::continuation::{
    ContinuationEngine, EngineDecision, ExecutionSnapshot, StopReason,
};
use crate::conversation::Conversation;
use crate::event::EventSink;
use crate::model_client::ModelClient;
use crate::stream::ToolCall;
use crate::tool::{Executor, ExecutorError, ToolExecution};

pub use builder::AgentBuilder;

/// Default ceiling on completed steps when no budget is configured.
pub const DEFAULT_MAX_STEPS: u64 = 20;

/// How the agent treats a response without tool calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// A pure-text response is a normal terminal turn.
    #[default]
    Auto,
    /// Every step must produce at least one tool call; a stream that
    /// ends without one is a fatal error.
    Required,
}

/// The combined ceiling on steps, tokens and elapsed time for one
/// execution.
#[derive(Clone, Copy, Debug)]
pub struct Budget {
    /// Maximum number of completed steps.
    pub max_steps: u64,
    /// Maximum accumulated token usage, unlimited when `None`.
    pub max_tokens: Option<u64>,
    /// Maximum wall-clock duration, unlimited when `None`.
    pub max_duration: Option<Duration>,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_tokens: None,
            max_duration: None,
        }
    }
}

impl Budget {
    /// Derives a budget for a delegated sub-execution.
    ///
    /// The child is structurally independent: it shares no counters
    /// with this budget and its caps never exceed the parent's.
    pub fn child(&self, max_steps: u64) -> Budget {
        Budget {
            max_steps: max_steps.min(self.max_steps),
            max_tokens: self.max_tokens,
            max_duration: self.max_duration,
        }
    }
}

/// One completed loop iteration: one model call, its tool calls, and
/// their executions.
#[derive(Clone, Debug)]
pub struct Step {
    /// The zero-based position of this step in the history.
    pub index: u64,
    /// The assistant's text response.
    pub text: String,
    /// Tool calls produced by this step, in emission order.
    pub tool_calls: Vec<ToolCall>,
    /// The recorded executions, in the same order as the calls.
    pub executions: Vec<ToolExecution>,
    /// Token usage of this step alone.
    pub usage: Usage,
    /// The reason the model finished generating.
    pub finish_reason: Option<FinishReason>,
    /// How long the step took, including tool executions.
    pub duration: Duration,
}

impl Step {
    /// Returns whether any tool execution in this step failed.
    #[inline]
    pub fn failed(&self) -> bool {
        self.executions.iter().any(ToolExecution::failed)
    }
}

/// A fatal loop failure.
///
/// Operational failures (argument validation, tool body errors,
/// transient invalid partial JSON) never surface here; they are
/// captured in step history and routed through the continuation
/// criteria instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent was configured with an invalid value.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The model provider failed.
    #[error("model provider error: {0}")]
    Provider(Box<dyn ModelProviderError>),
    /// The executor failed fatally.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    /// The stream ended without tool calls while the tool choice
    /// requires at least one.
    #[error(
        "the stream ended without tool calls but the tool choice requires \
         at least one"
    )]
    NoToolCalls,
}

/// The agent that drives the loop.
///
/// All state is owned by this value and mutated only by the loop that
/// runs it; nothing here is shared across threads.
pub struct Agent {
    pub(crate) model_client: ModelClient,
    pub(crate) executor: Executor,
    pub(crate) engine: ContinuationEngine,
    pub(crate) conversation: Conversation,
    pub(crate) tool_choice: ToolChoice,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) history: Vec<Step>,
    pub(crate) usage: Usage,
    pub(crate) started_at: Instant,
    pub(crate) stop_reason: Option<StopReason>,
}

impl Agent {
    /// Appends a user input to the conversation.
    #[inline]
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.conversation.push_user(text);
    }

    /// Runs exactly one step: sends the conversation to the model,
    /// assembles the streamed response, executes the discovered tool
    /// calls strictly sequentially, and records the step.
    pub async fn next_step(&mut self) -> Result<&Step, AgentError> {
        let step_started = Instant::now();
        let index = self.history.len() as u64;
        trace!("starting step {index}");

        let req = ModelRequest {
            messages: self.conversation.messages().to_vec(),
            tools: self.executor.definitions(),
        };
        let resp = {
            let sink = Arc::clone(&self.sink);
            self.model_client
                .send_request(req, move |event| sink.dispatch(event))
                .await
                .map_err(AgentError::Provider)?
        };

        if resp.tool_calls.is_empty()
            && self.tool_choice == ToolChoice::Required
        {
            return Err(AgentError::NoToolCalls);
        }

        if !resp.transcript.is_empty() {
            self.conversation.push_assistant(resp.transcript.clone());
        }

        // Execution order is a hard guarantee: one call at a time, in
        // the exact order the provider emitted them.
        let mut executions = Vec::with_capacity(resp.tool_calls.len());
        for call in &resp.tool_calls {
            let execution =
                self.executor.execute(call, self.sink.as_ref()).await?;
            self.conversation.push_observation(observation_of(&execution));
            executions.push(execution);
        }

        self.usage += resp.usage;
        self.history.push(Step {
            index,
            text: resp.transcript,
            tool_calls: resp.tool_calls,
            executions,
            usage: resp.usage,
            finish_reason: resp.finish_reason,
            duration: step_started.elapsed(),
        });

        let last = self.history.len() - 1;
        Ok(&self.history[last])
    }

    /// Repeats [`next_step`](Self::next_step) until the continuation
    /// engine resolves to stop, then returns the last completed step.
    ///
    /// Returns `None` when the criteria stopped the loop before any
    /// step ran.
    pub async fn final_step(&mut self) -> Result<Option<&Step>, AgentError> {
        loop {
            let decision = self.evaluate();
            if !decision.should_continue {
                self.stop_reason = decision.stop_reason;
                debug!(
                    "loop stopped after {} steps: {:?}",
                    self.history.len(),
                    self.stop_reason
                );
                break;
            }
            self.next_step().await?;
        }
        Ok(self.history.last())
    }

    /// Evaluates the continuation criteria against the current state.
    pub fn evaluate(&self) -> EngineDecision {
        self.engine.evaluate(&self.snapshot())
    }

    /// Returns why the loop hard-stopped, if it did.
    #[inline]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Returns all completed steps, oldest first.
    #[inline]
    pub fn history(&self) -> &[Step] {
        &self.history
    }

    /// Returns the accumulated token usage.
    #[inline]
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn snapshot(&self) -> ExecutionSnapshot<'_> {
        ExecutionSnapshot {
            step_count: self.history.len() as u64,
            usage: self.usage,
            started_at: self.started_at,
            current_step: self.history.last(),
            history: &self.history,
        }
    }
}

fn observation_of(execution: &ToolExecution) -> ToolObservation {
    let call = &execution.call;
    let content = match &execution.result {
        Ok(output) => output.clone(),
        Err(err) => {
            format!("tool {} failed: {}", call.name, err.reason())
        }
    };
    ToolObservation {
        id: call.id.clone(),
        tool_name: call.name.clone(),
        content,
        is_error: execution.failed(),
    }
}
