//! Project and regional scenario lifecycle handlers.

use super::{contain, HandleOutcome, HandlerLifecycle, MessageHandler};
use crate::events::{ProjectCreated, RegionalScenarioCreated, RegionalScenarioIndicatorsUpdated};
use crate::ingress::MessageContext;
use crate::propagation::{EventPublisher, PopulationCriterion, RegionalModelService};
use crate::taxonomy::IndicatorKind;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs the population criterion for the base scenario of a new project.
pub struct ProjectCreatedHandler {
    criterion: Arc<dyn PopulationCriterion>,
}

impl ProjectCreatedHandler {
    pub fn new(criterion: Arc<dyn PopulationCriterion>) -> Self {
        Self { criterion }
    }
}

#[async_trait]
impl HandlerLifecycle for ProjectCreatedHandler {
    fn name(&self) -> &'static str {
        "project_created"
    }
}

#[async_trait]
impl MessageHandler<ProjectCreated> for ProjectCreatedHandler {
    async fn handle(&self, event: ProjectCreated, ctx: &MessageContext) -> HandleOutcome {
        tracing::info!(
            project_id = event.project_id,
            base_scenario_id = event.base_scenario_id,
            "processing project creation"
        );
        let result = self
            .criterion
            .process_population_criterion(event.territory_id, event.base_scenario_id)
            .await;
        contain(
            "project",
            "process_population_criterion",
            event.base_scenario_id,
            ctx,
            result,
        )
    }
}

/// Computes the regional model of a new regional scenario, then announces the
/// population indicator as ready. The announcement is consumed by
/// [`super::RegionalIndicatorsHandler`], which is the second hop of the chain.
pub struct RegionalScenarioCreatedHandler {
    model: Arc<dyn RegionalModelService>,
    publisher: Arc<dyn EventPublisher>,
}

impl RegionalScenarioCreatedHandler {
    /// Indicator announced once the regional model is computed.
    pub const FIRST_READY_INDICATOR: IndicatorKind = IndicatorKind::Population;

    pub fn new(model: Arc<dyn RegionalModelService>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { model, publisher }
    }
}

#[async_trait]
impl HandlerLifecycle for RegionalScenarioCreatedHandler {
    fn name(&self) -> &'static str {
        "regional_scenario_created"
    }
}

#[async_trait]
impl MessageHandler<RegionalScenarioCreated> for RegionalScenarioCreatedHandler {
    async fn handle(&self, event: RegionalScenarioCreated, ctx: &MessageContext) -> HandleOutcome {
        let computed = self
            .model
            .calculate_regional_scenario_model(event.territory_id, event.scenario_id)
            .await;
        let outcome = contain(
            "regional",
            "calculate_regional_scenario_model",
            event.scenario_id,
            ctx,
            computed,
        );
        if outcome != HandleOutcome::Completed {
            return outcome;
        }

        let ready = RegionalScenarioIndicatorsUpdated {
            scenario_id: event.scenario_id,
            territory_id: event.territory_id,
            indicator_id: Self::FIRST_READY_INDICATOR.id(),
        };
        let published = self.publisher.publish(ready.into()).await;
        contain(
            "regional",
            "publish_indicators_updated",
            event.scenario_id,
            ctx,
            published,
        )
    }
}
