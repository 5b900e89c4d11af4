//! Recording fakes for the downstream collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use hextech_aggregator::{
    Collaborators, DownstreamError, IndicatorStore, PopulationCriterion, RegionalModelService,
    ScenarioId, TerritoryId,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SaveAll(ScenarioId),
    SaveRegional(ScenarioId, TerritoryId),
    RegionalModel(TerritoryId, ScenarioId),
    PopulationCriterion(TerritoryId, ScenarioId),
}

/// Records every call. Scenario ids in `missing` answer `NotFound`; ids in
/// `failing` answer a 500.
#[derive(Default)]
pub struct RecordingApi {
    calls: Mutex<Vec<Call>>,
    missing: Mutex<HashSet<ScenarioId>>,
    failing: Mutex<HashSet<ScenarioId>>,
}

impl RecordingApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn missing(self: &Arc<Self>, scenario_id: ScenarioId) -> Arc<Self> {
        self.missing.lock().insert(scenario_id);
        self.clone()
    }

    pub fn failing(self: &Arc<Self>, scenario_id: ScenarioId) -> Arc<Self> {
        self.failing.lock().insert(scenario_id);
        self.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            store: self.clone(),
            regional_model: self.clone(),
            population: self.clone(),
        }
    }

    fn answer(&self, scenario_id: ScenarioId, call: Call) -> Result<(), DownstreamError> {
        self.calls.lock().push(call);
        if self.missing.lock().contains(&scenario_id) {
            return Err(DownstreamError::NotFound(format!("scenario {scenario_id}")));
        }
        if self.failing.lock().contains(&scenario_id) {
            return Err(DownstreamError::Http {
                status: 500,
                body: "internal error".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IndicatorStore for RecordingApi {
    async fn save_all_indicators(&self, scenario_id: ScenarioId) -> Result<(), DownstreamError> {
        self.answer(scenario_id, Call::SaveAll(scenario_id))
    }

    async fn save_regional_indicators(
        &self,
        scenario_id: ScenarioId,
        territory_id: TerritoryId,
    ) -> Result<(), DownstreamError> {
        self.answer(scenario_id, Call::SaveRegional(scenario_id, territory_id))
    }
}

#[async_trait]
impl RegionalModelService for RecordingApi {
    async fn calculate_regional_scenario_model(
        &self,
        territory_id: TerritoryId,
        scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError> {
        self.answer(scenario_id, Call::RegionalModel(territory_id, scenario_id))
    }
}

#[async_trait]
impl PopulationCriterion for RecordingApi {
    async fn process_population_criterion(
        &self,
        territory_id: TerritoryId,
        base_scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError> {
        self.answer(
            base_scenario_id,
            Call::PopulationCriterion(territory_id, base_scenario_id),
        )
    }
}
