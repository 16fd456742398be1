//! Conversation-related types.

use stepwise_model::{ModelMessage, ToolObservation};

/// Represents a conversation.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    /// Creates a conversation, seeded with system instructions when
    /// provided.
    pub fn new(system_prompt: Option<String>) -> Self {
        let mut messages = Vec::new();
        if let Some(system_prompt) = system_prompt {
            messages.push(ModelMessage::System(system_prompt));
        }
        Self { messages }
    }

    /// Appends a user input.
    #[inline]
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ModelMessage::User(text.into()));
    }

    #[inline]
    pub(crate) fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(ModelMessage::Assistant(text.into()));
    }

    #[inline]
    pub(crate) fn push_observation(&mut self, observation: ToolObservation) {
        self.messages.push(ModelMessage::Tool(observation));
    }

    /// Returns all messages, oldest first.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }
}
