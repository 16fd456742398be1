use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use serde_json::Value;
use stepwise_model::{
    FinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, Usage,
};
use tracing::Instrument;

use crate::event::AgentEvent;
use crate::stream::{
    PartialJsonBuffer, PartialObjectPipeline, PipelineOutcome, ToolCall,
    ToolCallAssembler,
};

type SendRequestResult = Result<StepResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Box<dyn Fn(AgentEvent) + Send + 'static>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_event| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_event).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request, assembling the delta stream into a complete
    /// step response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// deltas when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_event: impl Fn(AgentEvent) + Send + 'static,
    ) -> SendRequestResult {
        (self.handler_fn)(req, Box::new(on_event)).await
    }
}

/// A completely assembled response from the model client.
#[derive(Clone, Debug)]
pub struct StepResponse {
    /// The assistant's text, without tool-argument fragments.
    pub transcript: String,
    /// Tool calls assembled from the stream, in emission order.
    pub tool_calls: Vec<ToolCall>,
    /// The reason the model finished generating.
    pub finish_reason: Option<FinishReason>,
    /// Token usage reported by the provider.
    pub usage: Usage,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_event: Box<dyn Fn(AgentEvent) + Send + 'static>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut transcript = String::new();
    let mut buffer = PartialJsonBuffer::new();
    let mut assembler = ToolCallAssembler::new();
    let mut preview = PartialObjectPipeline::<Value>::new();
    let mut completed = 0;
    let mut finish_reason = None;
    let mut usage = Usage::default();

    trace!("start receiving deltas");

    let mut pinned_resp = pin!(resp);
    loop {
        let delta_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_delta(cx)).await;
        let delta = match delta_or_err {
            Ok(delta) => delta,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(delta) = delta else {
            break;
        };
        trace!("got a delta: {delta:?}");

        if let Some(name) = delta.tool_name.as_deref() {
            let outcome = assembler.on_signal(name, &buffer);
            if outcome.requires_reset {
                buffer.reset();
                // Each call previews its own arguments.
                preview = PartialObjectPipeline::new();
            }
            for call in &assembler.calls()[completed..] {
                on_event(AgentEvent::StreamedToolCallCompleted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                });
            }
            completed = assembler.calls().len();
            if outcome.started {
                on_event(AgentEvent::StreamedToolCallStarted {
                    name: name.to_owned(),
                });
            }
        }

        if let Some(text) = delta.text {
            match assembler.active_call() {
                Some(active) => {
                    let active = active.to_owned();
                    buffer.push(&text);
                    if let PipelineOutcome::Emitted(arguments) =
                        preview.process(&buffer)
                    {
                        on_event(AgentEvent::StreamedToolCallUpdated {
                            name: active,
                            arguments,
                        });
                    }
                }
                None => {
                    transcript.push_str(&text);
                    on_event(AgentEvent::PartialResponse { delta: text });
                }
            }
        }

        if let Some(reason) = delta.finish_reason {
            finish_reason = Some(reason);
        }
        if let Some(fragment) = delta.usage {
            usage += fragment;
        }
    }

    let tool_calls = if assembler.started_calls() > 0 {
        // `finish` only errors when no call was ever started.
        let calls = assembler.finish(&buffer).unwrap_or_default();
        for call in &calls[completed..] {
            on_event(AgentEvent::StreamedToolCallCompleted {
                id: call.id.clone(),
                name: call.name.clone(),
            });
        }
        calls
    } else {
        Vec::new()
    };

    trace!("finished a request");

    Ok(StepResponse {
        transcript,
        tool_calls,
        finish_reason,
        usage,
    })
}
