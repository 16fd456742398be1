use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use stepwise_model::{Delta, FinishReason, ModelMessage, Usage};
use stepwise_test_model::{PresetResponse, TestModelProvider};

use super::*;
use crate::continuation::criteria::{
    RetryLimit, StepsLimit, ToolCallPresenceCheck,
};
use crate::tool::{Tool, ToolResult};

#[derive(Deserialize, JsonSchema)]
struct SumInput {
    a: i64,
    b: i64,
}

struct SumTool {
    schema: Value,
}

impl SumTool {
    fn new() -> Self {
        // Both fields are mandatory, so the derived schema carries a
        // top-level "required" list the executor validates against.
        Self {
            schema: serde_json::to_value(schemars::schema_for!(SumInput))
                .unwrap(),
        }
    }
}

impl Tool for SumTool {
    type Input = SumInput;

    fn name(&self) -> &str {
        "sum"
    }

    fn description(&self) -> &str {
        "Adds two integers"
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok((input.a + input.b).to_string()))
    }
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let mut provider = TestModelProvider::default();
    provider.add_user_input_step();
    provider.add_assistant_response_step(PresetResponse::with_events([
        Delta::text("Let me add. "),
        Delta::tool_name("sum"),
        Delta::text(r#"{"a": 2, "b": 3}"#),
        Delta::finish_reason(FinishReason::ToolCalls),
        Delta::usage(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    ]));
    // The assistant text and the tool observation both land in the
    // conversation, so the second request carries three messages and
    // selects script index 3.
    provider.add_user_input_step();
    provider.add_assistant_response_step(PresetResponse::with_events([
        Delta::text("The answer is 5."),
        Delta::finish_reason(FinishReason::Stop),
        Delta::usage(Usage {
            input_tokens: 20,
            output_tokens: 6,
        }),
    ]));

    let mut agent = AgentBuilder::with_model_provider(provider)
        .with_tool(SumTool::new())
        .build()
        .unwrap();
    agent.push_user("What is 2 + 3?");

    let last = agent.final_step().await.unwrap().unwrap();
    assert_eq!(last.text, "The answer is 5.");
    assert_eq!(last.finish_reason, Some(FinishReason::Stop));

    assert_eq!(agent.history().len(), 2);
    let first = &agent.history()[0];
    assert_eq!(first.tool_calls.len(), 1);
    assert_eq!(first.tool_calls[0].name, "sum");
    assert_eq!(first.executions[0].result, Ok("5".to_owned()));
    assert!(!first.failed());

    // The loop ran out of work rather than hitting a limit.
    assert_eq!(agent.stop_reason(), None);
    assert_eq!(agent.usage().total(), 41);

    let messages = agent.conversation().messages();
    assert!(matches!(
        &messages[2],
        ModelMessage::Tool(obs)
            if obs.tool_name == "sum" && obs.content == "5" && !obs.is_error
    ));
}

#[tokio::test]
async fn test_steps_limit_stops_the_loop() {
    let mut provider = TestModelProvider::default();
    provider.add_user_input_step();
    provider.add_assistant_response_step(PresetResponse::with_events([
        Delta::tool_name("sum"),
        Delta::text(r#"{"a": 1, "b": 1}"#),
        Delta::finish_reason(FinishReason::ToolCalls),
    ]));

    let mut agent = AgentBuilder::with_model_provider(provider)
        .with_tool(SumTool::new())
        .with_criterion(Arc::new(ToolCallPresenceCheck))
        .with_criterion(Arc::new(StepsLimit::new(1).unwrap()))
        .build()
        .unwrap();
    agent.push_user("Count forever");

    let last = agent.final_step().await.unwrap().unwrap();
    assert_eq!(last.index, 0);
    assert_eq!(agent.history().len(), 1);
    assert_eq!(agent.stop_reason(), Some(StopReason::StepsLimitReached));
}

#[tokio::test]
async fn test_failed_execution_is_captured_and_the_loop_recovers() {
    let mut provider = TestModelProvider::default();
    provider.add_user_input_step();
    // "b" is required but missing, so the execution fails without
    // invoking the tool body.
    provider.add_assistant_response_step(PresetResponse::with_events([
        Delta::tool_name("sum"),
        Delta::text(r#"{"a": 2}"#),
        Delta::finish_reason(FinishReason::ToolCalls),
    ]));
    // The first step produces no assistant text, only the error
    // observation, so the second request selects script index 2.
    provider.add_assistant_response_step(PresetResponse::with_events([
        Delta::text("I could not add those."),
        Delta::finish_reason(FinishReason::Stop),
    ]));

    let mut agent = AgentBuilder::with_model_provider(provider)
        .with_tool(SumTool::new())
        .with_criterion(Arc::new(ToolCallPresenceCheck))
        .with_criterion(Arc::new(RetryLimit::new(2).unwrap()))
        .with_criterion(Arc::new(StepsLimit::new(5).unwrap()))
        .build()
        .unwrap();
    agent.push_user("What is 2 + ?");

    let last = agent.final_step().await.unwrap().unwrap();
    assert_eq!(last.text, "I could not add those.");
    assert_eq!(agent.history().len(), 2);
    assert_eq!(agent.stop_reason(), None);

    let first = &agent.history()[0];
    assert!(first.failed());
    let err = first.executions[0].result.as_ref().unwrap_err();
    assert!(err.reason().contains("missing required arguments: b"));

    // The failure went back to the model as an error observation.
    let messages = agent.conversation().messages();
    assert!(matches!(
        &messages[1],
        ModelMessage::Tool(obs)
            if obs.tool_name == "sum"
                && obs.is_error
                && obs.content.contains("sum")
    ));
}

#[tokio::test]
async fn test_required_tool_choice_makes_text_only_responses_fatal() {
    let mut provider = TestModelProvider::default();
    provider.add_user_input_step();
    provider.add_assistant_response_step(PresetResponse::with_events([
        Delta::text("I would rather chat."),
        Delta::finish_reason(FinishReason::Stop),
    ]));

    let mut agent = AgentBuilder::with_model_provider(provider)
        .with_tool(SumTool::new())
        .with_tool_choice(ToolChoice::Required)
        .build()
        .unwrap();
    agent.push_user("Add something");

    let err = agent.final_step().await.unwrap_err();
    assert!(matches!(err, AgentError::NoToolCalls));
}

#[tokio::test]
async fn test_provider_failures_are_fatal() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_response_step(
        PresetResponse::with_events([Delta::text("never seen")])
            .with_failures(0),
    );

    let mut agent =
        AgentBuilder::with_model_provider(provider).build().unwrap();
    let err = agent.next_step().await.unwrap_err();
    assert!(matches!(err, AgentError::Provider(_)));
}

#[test]
fn test_missing_provider_is_rejected() {
    let result = AgentBuilder::default().build();
    assert!(matches!(result, Err(ConfigError::MissingProvider)));
}

#[test]
fn test_child_budget_never_exceeds_the_parent() {
    let parent = Budget {
        max_steps: 10,
        max_tokens: Some(1000),
        max_duration: Some(Duration::from_secs(60)),
    };

    let child = parent.child(3);
    assert_eq!(child.max_steps, 3);
    assert_eq!(child.max_tokens, Some(1000));
    assert_eq!(child.max_duration, Some(Duration::from_secs(60)));

    let child = parent.child(50);
    assert_eq!(child.max_steps, 10);
}
