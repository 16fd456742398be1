use std::sync::Arc;

use stepwise_model::ModelProvider;

use super::{Agent, Budget, ToolChoice};
use crate::continuation::criteria::{
    ConfigError, ExecutionTimeLimit, StepsLimit, ToolCallPresenceCheck,
    TokenUsageLimit,
};
use crate::continuation::{ContinuationCriterion, ContinuationEngine};
use crate::conversation::Conversation;
use crate::event::{EventSink, NullSink};
use crate::model_client::ModelClient;
use crate::tool::{AnyTool, Executor, Tool, ToolObject};

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: Option<ModelClient>,
    tools: Vec<Box<dyn ToolObject>>,
    system_prompt: Option<String>,
    criteria: Vec<Arc<dyn ContinuationCriterion>>,
    budget: Budget,
    tool_choice: ToolChoice,
    sink: Arc<dyn EventSink>,
    raise_on_tool_failure: bool,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            model_client: None,
            tools: vec![],
            system_prompt: None,
            criteria: vec![],
            budget: Budget::default(),
            tool_choice: ToolChoice::default(),
            sink: Arc::new(NullSink),
            raise_on_tool_failure: false,
        }
    }
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: Some(ModelClient::new(provider)),
            ..Self::default()
        }
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let tool = Box::new(AnyTool(tool));
        self.tools.push(tool);
        self
    }

    /// Sets the system prompt that seeds the conversation.
    #[inline]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Appends a continuation criterion.
    ///
    /// When no criterion is ever appended, [`build`](Self::build)
    /// installs a default set derived from the budget.
    #[inline]
    pub fn with_criterion(
        mut self,
        criterion: Arc<dyn ContinuationCriterion>,
    ) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Sets the execution budget.
    #[inline]
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Sets how responses without tool calls are treated.
    #[inline]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    /// Attaches a sink that observes agent events.
    #[inline]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Makes tool failures fatal instead of captured results.
    #[inline]
    pub fn raise_on_tool_failure(mut self, raise: bool) -> Self {
        self.raise_on_tool_failure = raise;
        self
    }

    /// Builds the agent, validating the configuration.
    pub fn build(self) -> Result<Agent, ConfigError> {
        let Some(model_client) = self.model_client else {
            return Err(ConfigError::MissingProvider);
        };

        let mut executor = Executor::with_tools(self.tools);
        executor.set_raise_on_failure(self.raise_on_tool_failure);

        let mut criteria = self.criteria;
        if criteria.is_empty() {
            criteria.push(Arc::new(ToolCallPresenceCheck));
            criteria.push(Arc::new(StepsLimit::new(self.budget.max_steps)?));
            if let Some(max_tokens) = self.budget.max_tokens {
                criteria.push(Arc::new(TokenUsageLimit::new(max_tokens)?));
            }
            if let Some(max_duration) = self.budget.max_duration {
                criteria
                    .push(Arc::new(ExecutionTimeLimit::new(max_duration)?));
            }
        }

        Ok(Agent {
            model_client,
            executor,
            engine: ContinuationEngine::new(criteria),
            conversation: Conversation::new(self.system_prompt),
            tool_choice: self.tool_choice,
            sink: self.sink,
            history: vec![],
            usage: Default::default(),
            started_at: std::time::Instant::now(),
            stop_reason: None,
        })
    }
}
