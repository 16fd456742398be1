//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use stepwise_model::{
    Delta, ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    #[allow(dead_code)]
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    provider: TestModelProvider,
    request: ModelRequest,
    event_idx: usize,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_delta(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Delta>, Self::Error>> {
        let step_idx = self.request.messages.len();
        if step_idx >= self.provider.conversation_script.len() {
            return Poll::Ready(Err(Error {
                message: "no enough steps",
                kind: ErrorKind::RateLimitExceeded,
            }));
        }

        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        let step = &this.provider.conversation_script[step_idx];
        let preset_events = match step {
            ConversationStep::UserInput => {
                return Poll::Ready(Err(Error {
                    message: "not an assistant response step",
                    kind: ErrorKind::Moderated,
                }));
            }
            ConversationStep::AssistantResponse(response) => &response.events,
        };

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            if this.event_idx < preset_events.len() {
                let delta = preset_events[this.event_idx].clone();
                this.event_idx += 1;
                return Poll::Ready(Ok(Some(delta)));
            }
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }
        this.sleep = Some(Box::pin(sleep(
            this.provider.delay.unwrap_or(Duration::from_millis(1)),
        )));
        Pin::new(this).poll_next_delta(cx)
    }
}

#[derive(Clone)]
enum ConversationStep {
    UserInput,
    AssistantResponse(PresetResponse),
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. The added steps will be
/// selected according to the history messages in your request. If there are no
/// enough steps in the script, an error will be returned.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<usize, u64>>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::UserInput);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    fn should_fail(&self, step_idx: usize) -> bool {
        let Some(ConversationStep::AssistantResponse(response)) =
            self.conversation_script.get(step_idx)
        else {
            return false;
        };
        let Some(failures) = response.failures else {
            return false;
        };
        let attempt = {
            let mut attempts = self
                .attempts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let counter = attempts.entry(step_idx).or_insert(0);
            *counter += 1;
            *counter
        };
        failures == 0 || attempt <= failures
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = if self.should_fail(req.messages.len()) {
            Err(Error {
                message: "preset failure",
                kind: ErrorKind::RateLimitExceeded,
            })
        } else {
            Ok(TestModelResponse {
                provider: self.clone(),
                request: req.clone(),
                event_idx: 0,
                sleep: None,
            })
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use serde_json::json;
    use stepwise_model::{FinishReason, ModelMessage, ModelTool};

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Option<String>, Option<FinishReason>) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_name = None;
        let mut finish_reason = None;
        loop {
            let delta = poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
                .await
                .unwrap();
            let Some(delta) = delta else {
                break;
            };
            if let Some(text) = delta.text {
                msg.push_str(&text);
            }
            if let Some(name) = delta.tool_name {
                tool_name = Some(name);
            }
            if let Some(reason) = delta.finish_reason {
                finish_reason = Some(reason);
            }
        }
        (msg, tool_name, finish_reason)
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            Delta::text("Hello, "),
            Delta::text("world!"),
            Delta::finish_reason(FinishReason::Stop),
        ]));
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            Delta::text("Sure, "),
            Delta::text("let me take a "),
            Delta::text("look."),
            Delta::tool_name("read_file"),
            Delta::text(r#"{ "filename": "todo.txt" }"#),
            Delta::finish_reason(FinishReason::ToolCalls),
        ]));

        let mut req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![ModelTool {
                name: "read_file".to_owned(),
                description: "Reads a file".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "filename": {
                            "type": "string",
                            "description": "The name of the file to read"
                        }
                    }
                }),
            }],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, _, finish_reason) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert_eq!(finish_reason, Some(FinishReason::Stop));

        req.messages
            .push(ModelMessage::Assistant("Hello, world!".to_owned()));
        req.messages
            .push(ModelMessage::User("Check my todo".to_owned()));
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_name, finish_reason) = collect_response(resp).await;
        assert_eq!(msg, r#"Sure, let me take a look.{ "filename": "todo.txt" }"#);
        assert_eq!(tool_name.as_deref(), Some("read_file"));
        assert_eq!(finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn test_preset_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_response_step(
            PresetResponse::with_events([
                Delta::text("Recovered."),
                Delta::finish_reason(FinishReason::Stop),
            ])
            .with_failures(2),
        );

        let req = ModelRequest {
            messages: vec![],
            tools: vec![],
        };
        for _ in 0..2 {
            let err = match provider.send_request(&req).await {
                Err(err) => err,
                Ok(_) => panic!("expected a preset failure"),
            };
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }

        let resp = provider.send_request(&req).await.unwrap();
        let (msg, _, _) = collect_response(resp).await;
        assert_eq!(msg, "Recovered.");
    }
}
