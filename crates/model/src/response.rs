use std::pin::Pin;
use std::task::{self, Poll};

use crate::delta::Delta;
use crate::provider::ModelProviderError;

/// A response from the model provider.
///
/// A response is a finite, non-restartable sequence of [`Delta`]
/// increments that the consumer pulls at its own pace.
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// Attempts to pull out the next delta from the response.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct response state:
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next delta. Implementations will ensure that the current
    ///   task will be notified when the next delta may be ready.
    /// - `Poll::Ready(Ok(Some(delta)))` means the response has a delta
    ///   to deliver, and may produce further deltas on subsequent
    ///   `poll_next_delta` calls.
    /// - `Poll::Ready(Ok(None))` means the response has completed.
    /// - `Poll::Ready(Err(error))` means an error occurred while
    ///   processing the response.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_delta(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<Delta>, Self::Error>>;
}
