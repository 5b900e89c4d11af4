//! Event handlers.
//!
//! Handlers own the error-containment policy: `handle` never fails. Every
//! outcome, including downstream errors, is classified, logged and returned
//! as a [`HandleOutcome`] so the ingress can commit and move on.

mod lifecycle;
mod regional;
mod scenario;

pub use lifecycle::{ProjectCreatedHandler, RegionalScenarioCreatedHandler};
pub use regional::RegionalIndicatorsHandler;
pub use scenario::ScenarioIndicatorsHandler;

use crate::error::{AggregatorError, DownstreamError};
use crate::events::ScenarioId;
use crate::ingress::MessageContext;
use crate::registry::{CompletionMode, Observation, ScenarioRegistry};
use crate::taxonomy::{IndicatorId, IndicatorKind};
use async_trait::async_trait;

// ============================================================================
// Handler traits
// ============================================================================

/// Startup/shutdown hooks run by the ingress around consumption.
#[async_trait]
pub trait HandlerLifecycle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_startup(&self) -> Result<(), AggregatorError> {
        Ok(())
    }

    async fn on_shutdown(&self) {}
}

/// Handler for one event payload type.
#[async_trait]
pub trait MessageHandler<E>: HandlerLifecycle {
    async fn handle(&self, event: E, ctx: &MessageContext) -> HandleOutcome;
}

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Indicator outside the tracked taxonomy; nothing was touched.
    Ignored,
    /// Slot recorded, waiting for more indicators.
    Pending { filled: usize },
    /// The downstream action ran and succeeded.
    Completed,
    /// The record had already fired; the trigger was suppressed.
    Suppressed,
    /// Downstream reported the scenario as missing.
    ScenarioNotFound,
    /// Downstream failed for another reason.
    DownstreamFailed,
}

// ============================================================================
// Shared completion tracking
// ============================================================================

/// Decision taken for one indicator event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Done(HandleOutcome),
    Fire,
}

/// A scope-tagged registry: the state machine both indicator handlers share.
#[derive(Debug)]
pub(crate) struct CompletionTracker {
    scope: &'static str,
    registry: ScenarioRegistry,
}

impl CompletionTracker {
    pub(crate) fn new(
        scope: &'static str,
        mode: CompletionMode,
        max_records: Option<usize>,
    ) -> Self {
        Self {
            scope,
            registry: ScenarioRegistry::new(mode, max_records),
        }
    }

    pub(crate) fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    pub(crate) fn track(&self, scenario_id: ScenarioId, indicator_id: IndicatorId) -> Step {
        let kind = match IndicatorKind::resolve(indicator_id) {
            Ok(kind) => kind,
            Err(err) => {
                tracing::debug!(
                    scope = self.scope,
                    scenario_id,
                    error = %err,
                    "ignoring untracked indicator"
                );
                return Step::Done(HandleOutcome::Ignored);
            }
        };

        match self.registry.observe(scenario_id, kind, indicator_id) {
            Observation::Pending { filled } => {
                tracing::debug!(
                    scope = self.scope,
                    scenario_id,
                    indicator = %kind,
                    filled,
                    "indicator recorded"
                );
                Step::Done(HandleOutcome::Pending { filled })
            }
            Observation::AlreadyFired => {
                tracing::info!(
                    scope = self.scope,
                    scenario_id,
                    indicator = %kind,
                    "scenario already completed, trigger suppressed"
                );
                Step::Done(HandleOutcome::Suppressed)
            }
            Observation::Fire => {
                tracing::info!(
                    scope = self.scope,
                    scenario_id,
                    indicator = %kind,
                    "all indicators collected"
                );
                Step::Fire
            }
        }
    }
}

/// Classify and log a downstream result. Never propagates.
pub(crate) fn contain(
    scope: &'static str,
    action: &'static str,
    scenario_id: ScenarioId,
    ctx: &MessageContext,
    result: Result<(), DownstreamError>,
) -> HandleOutcome {
    match result.map_err(|e| AggregatorError::from_downstream(scenario_id, e)) {
        Ok(()) => {
            tracing::info!(scope, action, scenario_id, "downstream action finished");
            HandleOutcome::Completed
        }
        Err(AggregatorError::ScenarioNotFound { .. }) => {
            tracing::info!(
                scope,
                action,
                scenario_id,
                "scenario not found downstream, skipping"
            );
            HandleOutcome::ScenarioNotFound
        }
        Err(err) => {
            tracing::error!(
                scope,
                action,
                scenario_id,
                topic = %ctx.topic,
                partition = ctx.partition,
                offset = ctx.offset,
                error = %err,
                "downstream action failed"
            );
            HandleOutcome::DownstreamFailed
        }
    }
}
