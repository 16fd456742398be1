//! The built-in criteria catalog.
//!
//! Guards (steps, tokens, time, retries, error policy) veto
//! continuation when a ceiling is hit and stand aside otherwise; work
//! drivers (tool-call presence, content predicate) request another
//! step when they see pending work. Limits are validated at
//! construction time so the engine itself never fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use stepwise_model::FinishReason;

use crate::continuation::{
    ContinuationCriterion, ContinuationDecision, ContinuationEvaluation,
    ExecutionSnapshot, StopReason,
};

/// A configuration rejected at construction time.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A limit that must be positive was zero.
    #[error("{criterion}: {what} must be greater than zero")]
    ZeroLimit {
        /// The criterion that rejected its configuration.
        criterion: &'static str,
        /// The offending parameter.
        what: &'static str,
    },
    /// The agent was built without a model provider.
    #[error("no model provider configured")]
    MissingProvider,
}

/// A source of the current time, injectable for determinism.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Forbids continuation once the completed step count reaches the
/// limit.
#[derive(Clone, Debug)]
pub struct StepsLimit {
    max_steps: u64,
}

impl StepsLimit {
    /// Creates the criterion. Errors when `max_steps` is zero.
    pub fn new(max_steps: u64) -> Result<Self, ConfigError> {
        if max_steps == 0 {
            return Err(ConfigError::ZeroLimit {
                criterion: "steps_limit",
                what: "max_steps",
            });
        }
        Ok(Self { max_steps })
    }
}

impl ContinuationCriterion for StepsLimit {
    fn name(&self) -> &str {
        "steps_limit"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let steps = snapshot.step_count;
        let eval = if steps >= self.max_steps {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::ForbidContinuation,
                format!(
                    "steps limit reached: {steps} of at most {} steps \
                     completed",
                    self.max_steps
                ),
            )
            .with_stop_reason(StopReason::StepsLimitReached)
        } else {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                format!(
                    "steps limit not reached: {steps} of {} steps completed",
                    self.max_steps
                ),
            )
        };
        eval.with_context("steps", steps)
            .with_context("max_steps", self.max_steps)
    }
}

/// Forbids continuation once the accumulated token usage reaches the
/// limit.
#[derive(Clone, Debug)]
pub struct TokenUsageLimit {
    max_tokens: u64,
}

impl TokenUsageLimit {
    /// Creates the criterion. Errors when `max_tokens` is zero.
    pub fn new(max_tokens: u64) -> Result<Self, ConfigError> {
        if max_tokens == 0 {
            return Err(ConfigError::ZeroLimit {
                criterion: "token_usage_limit",
                what: "max_tokens",
            });
        }
        Ok(Self { max_tokens })
    }
}

impl ContinuationCriterion for TokenUsageLimit {
    fn name(&self) -> &str {
        "token_usage_limit"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let used = snapshot.usage.total();
        let eval = if used >= self.max_tokens {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::ForbidContinuation,
                format!(
                    "token limit reached: {used} of at most {} tokens used",
                    self.max_tokens
                ),
            )
            .with_stop_reason(StopReason::TokenLimitReached)
        } else {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                format!(
                    "token limit not reached: {used} of {} tokens used",
                    self.max_tokens
                ),
            )
        };
        eval.with_context("tokens_used", used)
            .with_context("max_tokens", self.max_tokens)
    }
}

/// Forbids continuation once the wall-clock time since the execution
/// started reaches the limit.
#[derive(Clone)]
pub struct ExecutionTimeLimit {
    max_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl ExecutionTimeLimit {
    /// Creates the criterion with the system clock. Errors when
    /// `max_duration` is zero.
    pub fn new(max_duration: Duration) -> Result<Self, ConfigError> {
        if max_duration.is_zero() {
            return Err(ConfigError::ZeroLimit {
                criterion: "execution_time_limit",
                what: "max_duration",
            });
        }
        Ok(Self {
            max_duration,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock, mainly for deterministic tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl ContinuationCriterion for ExecutionTimeLimit {
    fn name(&self) -> &str {
        "execution_time_limit"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(snapshot.started_at);
        let eval = if elapsed >= self.max_duration {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::ForbidContinuation,
                format!(
                    "time limit reached: {elapsed:?} elapsed of at most {:?}",
                    self.max_duration
                ),
            )
            .with_stop_reason(StopReason::TimeLimitReached)
        } else {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                format!(
                    "time limit not reached: {elapsed:?} elapsed of {:?}",
                    self.max_duration
                ),
            )
        };
        eval.with_context("elapsed_ms", elapsed.as_millis() as u64)
            .with_context(
                "max_duration_ms",
                self.max_duration.as_millis() as u64,
            )
    }
}

/// Forbids continuation once the summed duration of all completed
/// steps reaches the limit.
///
/// Unlike [`ExecutionTimeLimit`] this only counts time spent inside
/// steps, so it needs no clock of its own.
#[derive(Clone, Debug)]
pub struct CumulativeExecutionTimeLimit {
    max_duration: Duration,
}

impl CumulativeExecutionTimeLimit {
    /// Creates the criterion. Errors when `max_duration` is zero.
    pub fn new(max_duration: Duration) -> Result<Self, ConfigError> {
        if max_duration.is_zero() {
            return Err(ConfigError::ZeroLimit {
                criterion: "cumulative_execution_time_limit",
                what: "max_duration",
            });
        }
        Ok(Self { max_duration })
    }
}

impl ContinuationCriterion for CumulativeExecutionTimeLimit {
    fn name(&self) -> &str {
        "cumulative_execution_time_limit"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let spent: Duration =
            snapshot.history.iter().map(|step| step.duration).sum();
        let eval = if spent >= self.max_duration {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::ForbidContinuation,
                format!(
                    "cumulative time limit reached: {spent:?} spent of at \
                     most {:?}",
                    self.max_duration
                ),
            )
            .with_stop_reason(StopReason::TimeLimitReached)
        } else {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                format!(
                    "cumulative time limit not reached: {spent:?} spent of \
                     {:?}",
                    self.max_duration
                ),
            )
        };
        eval.with_context("spent_ms", spent.as_millis() as u64)
            .with_context(
                "max_duration_ms",
                self.max_duration.as_millis() as u64,
            )
    }
}

/// What an error policy wants the loop to do about observed failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorDirective {
    /// Stop the loop.
    Stop,
    /// Run another step to retry.
    Retry,
    /// Keep going as if nothing happened.
    Ignore,
}

/// Routes observed step failures through a pure policy function of
/// `(consecutive_failures, total_failures)`.
///
/// With zero consecutive failures the criterion stands aside; the
/// policy is only consulted when the most recent step failed.
pub struct ErrorPolicyCriterion {
    policy: Box<dyn Fn(u64, u64) -> ErrorDirective + Send + Sync>,
}

impl ErrorPolicyCriterion {
    /// Creates the criterion from a pure policy function.
    pub fn new(
        policy: impl Fn(u64, u64) -> ErrorDirective + Send + Sync + 'static,
    ) -> Self {
        Self {
            policy: Box::new(policy),
        }
    }
}

impl ContinuationCriterion for ErrorPolicyCriterion {
    fn name(&self) -> &str {
        "error_policy"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let consecutive = snapshot.consecutive_failures();
        let total = snapshot.total_failures();
        let eval = if consecutive == 0 {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                "no failures observed",
            )
        } else {
            match (self.policy)(consecutive, total) {
                ErrorDirective::Stop => ContinuationEvaluation::new(
                    self.name(),
                    ContinuationDecision::ForbidContinuation,
                    format!(
                        "error policy forbade continuation after \
                         {consecutive} consecutive failures ({total} total)"
                    ),
                )
                .with_stop_reason(StopReason::ErrorForbade),
                ErrorDirective::Retry => ContinuationEvaluation::new(
                    self.name(),
                    ContinuationDecision::AllowContinuation,
                    format!(
                        "error policy requested a retry after {consecutive} \
                         consecutive failures ({total} total)"
                    ),
                ),
                ErrorDirective::Ignore => ContinuationEvaluation::new(
                    self.name(),
                    ContinuationDecision::AllowContinuation,
                    format!(
                        "error policy ignored {consecutive} consecutive \
                         failures ({total} total)"
                    ),
                ),
            }
        };
        eval.with_context("consecutive_failures", consecutive)
            .with_context("total_failures", total)
    }
}

/// Forbids continuation when the current step's finish reason is in
/// the configured stop set.
#[derive(Clone, Debug)]
pub struct FinishReasonCheck {
    stop_set: Vec<FinishReason>,
}

impl FinishReasonCheck {
    /// Creates the criterion with an explicit stop set. An empty set
    /// never forbids.
    pub fn new(stop_set: impl Into<Vec<FinishReason>>) -> Self {
        Self {
            stop_set: stop_set.into(),
        }
    }
}

impl Default for FinishReasonCheck {
    /// Stops on [`FinishReason::Stop`].
    fn default() -> Self {
        Self::new([FinishReason::Stop])
    }
}

impl ContinuationCriterion for FinishReasonCheck {
    fn name(&self) -> &str {
        "finish_reason_check"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let reason = snapshot.current_step.and_then(|step| step.finish_reason);
        match reason {
            Some(reason) if self.stop_set.contains(&reason) => {
                ContinuationEvaluation::new(
                    self.name(),
                    ContinuationDecision::ForbidContinuation,
                    format!("finish reason {reason:?} is in the stop set"),
                )
                .with_stop_reason(StopReason::FinishReasonReceived)
                .with_context("finish_reason", format!("{reason:?}"))
            }
            Some(reason) => ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowContinuation,
                format!("finish reason {reason:?} is not in the stop set"),
            )
            .with_context("finish_reason", format!("{reason:?}")),
            None => ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowContinuation,
                "no finish reason available",
            ),
        }
    }
}

/// Requests continuation while the most recent step produced tool
/// calls.
///
/// Before any step has run the criterion always allows continuation,
/// so a fresh execution can bootstrap its first step.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToolCallPresenceCheck;

impl ContinuationCriterion for ToolCallPresenceCheck {
    fn name(&self) -> &str {
        "tool_call_presence_check"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        if snapshot.step_count == 0 {
            return ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowContinuation,
                "no steps completed yet",
            );
        }
        let pending = snapshot
            .current_step
            .map(|step| step.tool_calls.len())
            .unwrap_or(0);
        if pending > 0 {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::RequestContinuation,
                format!("the last step produced {pending} tool calls"),
            )
            .with_context("tool_calls", pending as u64)
        } else {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                "the last step produced no tool calls",
            )
        }
    }
}

/// Forbids continuation once the consecutive tail of failed steps
/// reaches the limit.
///
/// The comparison is inclusive: a tail of exactly `max_retries` failed
/// steps already forbids.
#[derive(Clone, Debug)]
pub struct RetryLimit {
    max_retries: u64,
}

impl RetryLimit {
    /// Creates the criterion. Errors when `max_retries` is zero.
    pub fn new(max_retries: u64) -> Result<Self, ConfigError> {
        if max_retries == 0 {
            return Err(ConfigError::ZeroLimit {
                criterion: "retry_limit",
                what: "max_retries",
            });
        }
        Ok(Self { max_retries })
    }
}

impl ContinuationCriterion for RetryLimit {
    fn name(&self) -> &str {
        "retry_limit"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let consecutive = snapshot.consecutive_failures();
        let eval = if consecutive >= self.max_retries {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::ForbidContinuation,
                format!(
                    "retry limit reached: {consecutive} consecutive failed \
                     steps of at most {}",
                    self.max_retries
                ),
            )
            .with_stop_reason(StopReason::RetryLimitReached)
        } else {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                format!(
                    "retry limit not reached: {consecutive} consecutive \
                     failed steps of {}",
                    self.max_retries
                ),
            )
        };
        eval.with_context("consecutive_failures", consecutive)
            .with_context("max_retries", self.max_retries)
    }
}

/// Requests continuation while a predicate over the current step's
/// text holds.
///
/// Before any response exists the criterion allows continuation, so a
/// fresh execution can bootstrap its first step.
pub struct ResponseContentCheck {
    predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl ResponseContentCheck {
    /// Creates the criterion from a pure predicate.
    pub fn new(
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
        }
    }
}

impl ContinuationCriterion for ResponseContentCheck {
    fn name(&self) -> &str {
        "response_content_check"
    }

    fn evaluate(
        &self,
        snapshot: &ExecutionSnapshot<'_>,
    ) -> ContinuationEvaluation {
        let Some(step) = snapshot.current_step else {
            return ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowContinuation,
                "no response available yet",
            );
        };
        if (self.predicate)(&step.text) {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::RequestContinuation,
                "the response content matched the predicate",
            )
        } else {
            ContinuationEvaluation::new(
                self.name(),
                ContinuationDecision::AllowStop,
                "the response content did not match the predicate",
            )
        }
    }
}
