//! Project-scope scenario indicator aggregation.

use super::{contain, CompletionTracker, HandleOutcome, HandlerLifecycle, MessageHandler, Step};
use crate::events::ScenarioIndicatorsUpdated;
use crate::ingress::MessageContext;
use crate::propagation::IndicatorStore;
use crate::registry::{CompletionMode, ScenarioRegistry};
use async_trait::async_trait;
use std::sync::Arc;

const SCOPE: &str = "scenario";

/// Collects `ScenarioIndicatorsUpdated` events and saves all indicators once
/// a project scenario has its five base indicators.
pub struct ScenarioIndicatorsHandler {
    tracker: CompletionTracker,
    store: Arc<dyn IndicatorStore>,
}

impl ScenarioIndicatorsHandler {
    pub fn new(
        store: Arc<dyn IndicatorStore>,
        mode: CompletionMode,
        max_records: Option<usize>,
    ) -> Self {
        Self {
            tracker: CompletionTracker::new(SCOPE, mode, max_records),
            store,
        }
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        self.tracker.registry()
    }
}

#[async_trait]
impl HandlerLifecycle for ScenarioIndicatorsHandler {
    fn name(&self) -> &'static str {
        "scenario_indicators"
    }

    async fn on_shutdown(&self) {
        let dropped = self.registry().len();
        self.registry().clear();
        tracing::info!(scope = SCOPE, dropped, "scenario registry cleared");
    }
}

#[async_trait]
impl MessageHandler<ScenarioIndicatorsUpdated> for ScenarioIndicatorsHandler {
    async fn handle(
        &self,
        event: ScenarioIndicatorsUpdated,
        ctx: &MessageContext,
    ) -> HandleOutcome {
        tracing::debug!(
            scenario_id = event.scenario_id,
            indicator_id = event.indicator_id,
            project_id = event.project_id,
            "processing scenario indicator update"
        );
        match self.tracker.track(event.scenario_id, event.indicator_id) {
            Step::Done(outcome) => outcome,
            Step::Fire => {
                let result = self.store.save_all_indicators(event.scenario_id).await;
                contain(SCOPE, "save_all_indicators", event.scenario_id, ctx, result)
            }
        }
    }
}
