use serde::{Deserialize, Serialize};
use stepwise_model::Delta;

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Deltas streamed by this response, in order. Include an explicit
    /// finish-reason delta when the consumer should see one.
    pub events: Vec<Delta>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified deltas.
    #[inline]
    pub fn with_events(events: impl Into<Vec<Delta>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
        }
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }
}
