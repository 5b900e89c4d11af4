//! Region-scope scenario indicator aggregation.

use super::{contain, CompletionTracker, HandleOutcome, HandlerLifecycle, MessageHandler, Step};
use crate::events::RegionalScenarioIndicatorsUpdated;
use crate::ingress::MessageContext;
use crate::propagation::IndicatorStore;
use crate::registry::{CompletionMode, ScenarioRegistry};
use async_trait::async_trait;
use std::sync::Arc;

const SCOPE: &str = "regional";

/// Same state machine as [`super::ScenarioIndicatorsHandler`] over its own
/// registry; regional and project scenario ids never share records.
pub struct RegionalIndicatorsHandler {
    tracker: CompletionTracker,
    store: Arc<dyn IndicatorStore>,
}

impl RegionalIndicatorsHandler {
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
impl HandlerLifecycle for RegionalIndicatorsHandler {
    fn name(&self) -> &'static str {
        "regional_indicators"
    }

    async fn on_shutdown(&self) {
        let dropped = self.registry().len();
        self.registry().clear();
        tracing::info!(scope = SCOPE, dropped, "regional registry cleared");
    }
}

#[async_trait]
impl MessageHandler<RegionalScenarioIndicatorsUpdated> for RegionalIndicatorsHandler {
    async fn handle(
        &self,
        event: RegionalScenarioIndicatorsUpdated,
        ctx: &MessageContext,
    ) -> HandleOutcome {
        tracing::debug!(
            scenario_id = event.scenario_id,
            territory_id = event.territory_id,
            indicator_id = event.indicator_id,
            "processing regional indicator update"
        );
        match self.tracker.track(event.scenario_id, event.indicator_id) {
            Step::Done(outcome) => outcome,
            Step::Fire => {
                let result = self
                    .store
                    .save_regional_indicators(event.scenario_id, event.territory_id)
                    .await;
                contain(
                    SCOPE,
                    "save_regional_indicators",
                    event.scenario_id,
                    ctx,
                    result,
                )
            }
        }
    }
}
