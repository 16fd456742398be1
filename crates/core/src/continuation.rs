//! The continuation-resolution engine.
//!
//! After every step the agent asks a list of criteria whether the loop
//! should keep going. Each criterion is a pure function of an
//! immutable snapshot, so an evaluation can be replayed and audited.
//! The engine folds the per-criterion verdicts with one fixed priority
//! rule and never fails at evaluation time.

pub mod criteria;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use stepwise_model::Usage;

use crate::agent::Step;

/// The verdict of a single criterion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationDecision {
    /// A hard ceiling was hit; the loop must stop no matter what.
    ForbidContinuation,
    /// The criterion has no objection to another step.
    AllowContinuation,
    /// The criterion has pending work and wants another step.
    RequestContinuation,
    /// The criterion has no objection to stopping.
    AllowStop,
}

/// The diagnostic tag explaining why a hard stop occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The steps ceiling was hit.
    StepsLimitReached,
    /// The token ceiling was hit.
    TokenLimitReached,
    /// The wall-clock or cumulative time ceiling was hit.
    TimeLimitReached,
    /// The error policy classified the failures as fatal.
    ErrorForbade,
    /// Too many consecutive failed steps.
    RetryLimitReached,
    /// The model reported a finish reason from the stop set.
    FinishReasonReceived,
}

/// One criterion's full evaluation, produced fresh each time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContinuationEvaluation {
    /// The name of the criterion that produced this evaluation.
    pub criterion: String,
    /// The verdict.
    pub decision: ContinuationDecision,
    /// A human-readable reason naming the limit, its threshold and
    /// the observed value.
    pub reason: String,
    /// The stop cause, attached only to hard-stop evaluations.
    pub stop_reason: Option<StopReason>,
    /// Arbitrary diagnostic context.
    pub context: Map<String, Value>,
}

impl ContinuationEvaluation {
    /// Creates an evaluation with no stop reason and empty context.
    pub fn new(
        criterion: impl Into<String>,
        decision: ContinuationDecision,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            criterion: criterion.into(),
            decision,
            reason: reason.into(),
            stop_reason: None,
            context: Map::new(),
        }
    }

    /// Attaches a stop reason.
    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = Some(stop_reason);
        self
    }

    /// Adds a diagnostic context entry.
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// An immutable view of the execution state that criteria evaluate.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionSnapshot<'a> {
    /// Number of completed steps.
    pub step_count: u64,
    /// Accumulated token usage.
    pub usage: Usage,
    /// When the execution started.
    pub started_at: Instant,
    /// The most recently completed step, if any.
    pub current_step: Option<&'a Step>,
    /// All completed steps, oldest first.
    pub history: &'a [Step],
}

impl<'a> ExecutionSnapshot<'a> {
    /// Counts the consecutive tail of failed steps, newest backwards.
    pub fn consecutive_failures(&self) -> u64 {
        self.history
            .iter()
            .rev()
            .take_while(|step| step.failed())
            .count() as u64
    }

    /// Counts all failed steps in history.
    pub fn total_failures(&self) -> u64 {
        self.history.iter().filter(|step| step.failed()).count() as u64
    }
}

/// A pure evaluator mapping a snapshot to an evaluation.
pub trait ContinuationCriterion: Send + Sync {
    /// Returns the name of this criterion.
    fn name(&self) -> &str;

    /// Evaluates the snapshot. Must be a pure function of it.
    fn evaluate(&self, snapshot: &ExecutionSnapshot<'_>)
    -> ContinuationEvaluation;
}

/// The engine's folded decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineDecision {
    /// Whether the loop should run another step.
    pub should_continue: bool,
    /// The cause of a hard stop, if one occurred.
    pub stop_reason: Option<StopReason>,
    /// Every criterion's evaluation, in registration order.
    pub evaluations: Vec<ContinuationEvaluation>,
}

/// Folds an ordered list of criteria into one decision.
#[derive(Clone)]
pub struct ContinuationEngine {
    criteria: Vec<Arc<dyn ContinuationCriterion>>,
}

impl ContinuationEngine {
    /// Creates an engine from an ordered criteria list.
    pub fn new(criteria: Vec<Arc<dyn ContinuationCriterion>>) -> Self {
        Self { criteria }
    }

    /// Runs every criterion against the identical snapshot and
    /// resolves with the fixed priority rule:
    ///
    /// 1. any [`ForbidContinuation`] wins and stops the loop;
    /// 2. else any [`AllowContinuation`] or [`RequestContinuation`]
    ///    continues it;
    /// 3. else everybody stands aside and the loop stops.
    ///
    /// [`ForbidContinuation`]: ContinuationDecision::ForbidContinuation
    /// [`AllowContinuation`]: ContinuationDecision::AllowContinuation
    /// [`RequestContinuation`]: ContinuationDecision::RequestContinuation
    pub fn evaluate(&self, snapshot: &ExecutionSnapshot<'_>) -> EngineDecision {
        let evaluations: Vec<ContinuationEvaluation> = self
            .criteria
            .iter()
            .map(|criterion| criterion.evaluate(snapshot))
            .collect();

        let forbidding = evaluations.iter().find(|eval| {
            eval.decision == ContinuationDecision::ForbidContinuation
        });
        if let Some(forbidding) = forbidding {
            trace!(
                "continuation forbidden by {}: {}",
                forbidding.criterion, forbidding.reason
            );
            return EngineDecision {
                should_continue: false,
                stop_reason: forbidding.stop_reason,
                evaluations,
            };
        }

        let should_continue = evaluations.iter().any(|eval| {
            matches!(
                eval.decision,
                ContinuationDecision::AllowContinuation
                    | ContinuationDecision::RequestContinuation
            )
        });
        EngineDecision {
            should_continue,
            stop_reason: None,
            evaluations,
        }
    }
}
