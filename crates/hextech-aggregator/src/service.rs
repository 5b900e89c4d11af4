//! Broker service: wires the handlers into an ingress and owns its lifetime.

use crate::api_client::HextechApiClient;
use crate::broker::{Broker, Producer};
use crate::config::AggregatorConfig;
use crate::error::AggregatorError;
use crate::events::{
    ProjectCreated, RegionalScenarioCreated, RegionalScenarioIndicatorsUpdated,
    ScenarioIndicatorsUpdated,
};
use crate::handlers::{
    ProjectCreatedHandler, RegionalIndicatorsHandler, RegionalScenarioCreatedHandler,
    ScenarioIndicatorsHandler,
};
use crate::ingress::{EventIngress, IngressConfig, IngressStats};
use crate::propagation::{
    BrokerPublisher, IndicatorStore, PopulationCriterion, RegionalModelService,
};
use std::sync::Arc;

/// Downstream services the handlers call into.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn IndicatorStore>,
    pub regional_model: Arc<dyn RegionalModelService>,
    pub population: Arc<dyn PopulationCriterion>,
}

impl Collaborators {
    /// Every collaborator served by the same API client.
    pub fn from_api_client(client: Arc<HextechApiClient>) -> Self {
        Self {
            store: client.clone(),
            regional_model: client.clone(),
            population: client,
        }
    }
}

pub struct BrokerService {
    config: AggregatorConfig,
    ingress: EventIngress,
    scenario: Arc<ScenarioIndicatorsHandler>,
    regional: Arc<RegionalIndicatorsHandler>,
}

impl BrokerService {
    /// Build the four handlers and bind them to one worker per topic.
    pub fn new(
        config: AggregatorConfig,
        collaborators: Collaborators,
        producer: Arc<dyn Producer>,
    ) -> Result<Self, AggregatorError> {
        config.validate()?;

        let scenario = Arc::new(ScenarioIndicatorsHandler::new(
            collaborators.store.clone(),
            config.completion_mode,
            config.max_records,
        ));
        let regional = Arc::new(RegionalIndicatorsHandler::new(
            collaborators.store,
            config.completion_mode,
            config.max_records,
        ));
        let project = Arc::new(ProjectCreatedHandler::new(collaborators.population));
        let publisher = Arc::new(BrokerPublisher::new(producer, config.topics.clone()));
        let regional_created = Arc::new(RegionalScenarioCreatedHandler::new(
            collaborators.regional_model,
            publisher,
        ));

        let mut ingress = EventIngress::new(IngressConfig {
            shutdown_timeout: config.shutdown_timeout(),
        });
        ingress.register::<ProjectCreated, _>(project)?;
        ingress.register::<RegionalScenarioCreated, _>(regional_created)?;
        ingress.register::<ScenarioIndicatorsUpdated, _>(scenario.clone())?;
        ingress.register::<RegionalScenarioIndicatorsUpdated, _>(regional.clone())?;

        ingress.add_worker([config.topics.scenario_events.clone()]);
        if config.topics.indicator_events != config.topics.scenario_events {
            ingress.add_worker([config.topics.indicator_events.clone()]);
        }

        Ok(Self {
            config,
            ingress,
            scenario,
            regional,
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn scenario_handler(&self) -> &Arc<ScenarioIndicatorsHandler> {
        &self.scenario
    }

    pub fn regional_handler(&self) -> &Arc<RegionalIndicatorsHandler> {
        &self.regional
    }

    pub fn stats(&self) -> Arc<IngressStats> {
        self.ingress.stats()
    }

    pub fn is_running(&self) -> bool {
        self.ingress.is_running()
    }

    pub async fn register_and_start(
        &mut self,
        broker: Arc<dyn Broker>,
    ) -> Result<(), AggregatorError> {
        tracing::info!(
            topics = ?self.config.topics.all(),
            mode = %self.config.completion_mode,
            max_records = ?self.config.max_records,
            "starting broker service"
        );
        self.ingress.start(broker).await
    }

    pub async fn stop(&mut self) {
        tracing::info!("stopping broker service");
        self.ingress.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::error::DownstreamError;
    use crate::events::{ScenarioId, TerritoryId};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl IndicatorStore for Noop {
        async fn save_all_indicators(&self, _: ScenarioId) -> Result<(), DownstreamError> {
            Ok(())
        }

        async fn save_regional_indicators(
            &self,
            _: ScenarioId,
            _: TerritoryId,
        ) -> Result<(), DownstreamError> {
            Ok(())
        }
    }

    #[async_trait]
    impl RegionalModelService for Noop {
        async fn calculate_regional_scenario_model(
            &self,
            _: TerritoryId,
            _: ScenarioId,
        ) -> Result<(), DownstreamError> {
            Ok(())
        }
    }

    #[async_trait]
    impl PopulationCriterion for Noop {
        async fn process_population_criterion(
            &self,
            _: TerritoryId,
            _: ScenarioId,
        ) -> Result<(), DownstreamError> {
            Ok(())
        }
    }

    fn collaborators() -> Collaborators {
        let noop = Arc::new(Noop);
        Collaborators {
            store: noop.clone(),
            regional_model: noop.clone(),
            population: noop,
        }
    }

    #[tokio::test]
    async fn starts_and_stops() {
        let config = AggregatorConfig::default();
        let broker = Arc::new(MemoryBroker::new(config.topics.all(), 2));
        let mut service = BrokerService::new(config, collaborators(), broker.clone()).unwrap();
        assert!(!service.is_running());

        service.register_and_start(broker.clone()).await.unwrap();
        assert!(service.is_running());
        assert!(service.register_and_start(broker).await.is_err());

        service.stop().await;
        assert!(!service.is_running());
    }

    #[test]
    fn rejects_invalid_config() {
        let config = AggregatorConfig {
            partitions: 0,
            ..AggregatorConfig::default()
        };
        let broker = Arc::new(MemoryBroker::new(["t"], 1));
        assert!(BrokerService::new(config, collaborators(), broker).is_err());
    }

    #[tokio::test]
    async fn subscribing_to_unknown_topic_fails_startup() {
        let config = AggregatorConfig::default();
        let broker = Arc::new(MemoryBroker::new(["other"], 1));
        let mut service = BrokerService::new(config, collaborators(), broker.clone()).unwrap();
        assert!(matches!(
            service.register_and_start(broker).await,
            Err(AggregatorError::Broker(_))
        ));
        assert!(!service.is_running());
    }
}
