use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use stepwise_model::ModelTool;
use tracing::Instrument;

use crate::event::{AgentEvent, EventSink};
use crate::stream::ToolCall;
use crate::tool::{Error, ToolObject, ToolResult};

/// A recorded tool execution.
#[derive(Clone, Debug)]
pub struct ToolExecution {
    /// The call that was executed.
    pub call: ToolCall,
    /// The outcome, captured as a value rather than raised.
    pub result: ToolResult,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution ended.
    pub ended_at: DateTime<Utc>,
}

impl ToolExecution {
    /// Returns whether this execution failed.
    #[inline]
    pub fn failed(&self) -> bool {
        self.result.is_err()
    }
}

/// A fatal executor failure.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The model requested a tool that was never registered.
    #[error("tool not found: {name}")]
    ToolNotFound {
        /// The requested tool name.
        name: String,
    },
    /// A tool failed while the raise-on-failure mode was enabled.
    #[error("tool {name} failed: {reason}")]
    ToolFailed {
        /// The failing tool's name.
        name: String,
        /// The normalized failure reason.
        reason: String,
    },
}

/// An executor that handles tool calls discovered by the assembler.
pub struct Executor {
    tools: HashMap<String, Box<dyn ToolObject>>,
    raise_on_failure: bool,
}

impl Executor {
    pub(crate) fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let mut tool_map = HashMap::with_capacity(tools.len());
        for tool in tools {
            let name = tool.name();
            tool_map.insert(name.to_owned(), tool);
        }
        Self {
            tools: tool_map,
            raise_on_failure: false,
        }
    }

    /// Converts captured tool failures into raised [`ExecutorError`]s,
    /// after timestamps are recorded and the completed notification is
    /// dispatched.
    pub(crate) fn set_raise_on_failure(&mut self, raise: bool) {
        self.raise_on_failure = raise;
    }

    #[inline]
    pub(crate) fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .values()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Executes one tool call.
    ///
    /// An unknown tool name is fatal. Anything that goes wrong past
    /// the lookup (missing required arguments, undecodable input, a
    /// failing tool body) is captured in the returned execution's
    /// result instead, unless the raise-on-failure mode is enabled.
    pub(crate) async fn execute(
        &self,
        call: &ToolCall,
        sink: &dyn EventSink,
    ) -> Result<ToolExecution, ExecutorError> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!("tool not found: {}", call.name);
            return Err(ExecutorError::ToolNotFound {
                name: call.name.clone(),
            });
        };

        sink.dispatch(AgentEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
        });
        let started_at = Utc::now();

        let result = match missing_required(
            tool.parameter_schema(),
            &call.arguments,
        ) {
            missing if !missing.is_empty() => {
                // The tool body is never invoked on a validation
                // failure.
                Err(Error::invalid_input().with_reason(format!(
                    "missing required arguments: {}",
                    missing.join(", ")
                )))
            }
            _ => {
                trace!("executing tool {} ({})", call.name, call.id);
                tool.execute(call.arguments.clone())
                    .instrument(debug_span!(
                        "tool execute",
                        tool = call.name.as_str()
                    ))
                    .await
            }
        };

        let ended_at = Utc::now();
        let error = result
            .as_ref()
            .err()
            .map(|err| err.reason().into_owned());
        sink.dispatch(AgentEvent::ToolCallCompleted {
            name: call.name.clone(),
            success: result.is_ok(),
            error: error.clone(),
            started_at: started_at.to_rfc3339(),
            ended_at: ended_at.to_rfc3339(),
        });

        if self.raise_on_failure {
            if let Some(reason) = error {
                return Err(ExecutorError::ToolFailed {
                    name: call.name.clone(),
                    reason,
                });
            }
        }

        Ok(ToolExecution {
            call: call.clone(),
            result,
            started_at,
            ended_at,
        })
    }
}

/// Resolves the schema's declared `"required"` names that are absent
/// from the supplied arguments.
fn missing_required(schema: &Value, arguments: &Value) -> Vec<String> {
    let Some(required) = schema.get("required").and_then(Value::as_array)
    else {
        return Vec::new();
    };
    required
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| arguments.get(*name).is_none())
        .map(str::to_owned)
        .collect()
}
