use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// One increment of a streamed model response.
///
/// Every field is optional; a provider emits whatever fragment it has
/// at the moment. A text fragment may belong to the assistant message
/// or to the arguments of the tool call that is currently being
/// streamed, the consumer decides by tracking the tool-name signals it
/// has seen so far.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// A text fragment.
    pub text: Option<String>,
    /// A loose tool-name signal. Providers may repeat the same name
    /// for every argument fragment of one call; consumers must treat
    /// a repeated name with no buffered arguments as a no-op.
    pub tool_name: Option<String>,
    /// The finish reason, usually carried by the last increment.
    pub finish_reason: Option<FinishReason>,
    /// A usage fragment. Fragments are additive.
    pub usage: Option<Usage>,
}

impl Delta {
    /// Creates a delta carrying only a text fragment.
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Creates a delta carrying only a tool-name signal.
    #[inline]
    pub fn tool_name(name: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Creates a delta carrying only a finish reason.
    #[inline]
    pub fn finish_reason(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    /// Creates a delta carrying only a usage fragment.
    #[inline]
    pub fn usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Default::default()
        }
    }
}

/// The reason why a model response has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model has finished generating text.
    Stop,
    /// The model needs to call a tool.
    ToolCalls,
    /// The response hit the output token limit.
    Length,
    /// The content was filtered by the provider.
    ContentFilter,
}

impl FinishReason {
    /// Normalizes a provider-specific finish reason spelling.
    ///
    /// Returns `None` for spellings this crate doesn't know about.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw {
            "stop" | "end_turn" | "completed" => Some(Self::Stop),
            "tool_calls" | "tool_use" | "function_call" => {
                Some(Self::ToolCalls)
            }
            "length" | "max_tokens" => Some(Self::Length),
            "content_filter" => Some(Self::ContentFilter),
            _ => None,
        }
    }
}

/// Token usage of a model response.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Usage {
    /// Number of tokens in the input.
    pub input_tokens: u64,
    /// Number of tokens in the generated output.
    pub output_tokens: u64,
}

impl Usage {
    /// Returns the total number of tokens.
    #[inline]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for Usage {
    type Output = Usage;

    #[inline]
    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for Usage {
    #[inline]
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_finish_reason() {
        assert_eq!(
            FinishReason::normalize("end_turn"),
            Some(FinishReason::Stop)
        );
        assert_eq!(
            FinishReason::normalize("tool_use"),
            Some(FinishReason::ToolCalls)
        );
        assert_eq!(
            FinishReason::normalize("max_tokens"),
            Some(FinishReason::Length)
        );
        assert_eq!(FinishReason::normalize("weird"), None);
    }

    #[test]
    fn test_usage_accumulation() {
        let mut usage = Usage {
            input_tokens: 10,
            output_tokens: 2,
        };
        usage += Usage {
            input_tokens: 0,
            output_tokens: 5,
        };
        assert_eq!(usage.total(), 17);
    }
}
