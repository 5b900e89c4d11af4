//! Downstream propagation seams.
//!
//! From the aggregator's point of view every collaborator is fire-and-forget:
//! results are awaited only to classify failures.

use crate::broker::Producer;
use crate::config::TopicConfig;
use crate::error::{BrokerError, DownstreamError};
use crate::events::{DomainEvent, ScenarioId, TerritoryId};
use async_trait::async_trait;
use std::sync::Arc;

/// Materializes computed indicators for a completed scenario.
#[async_trait]
pub trait IndicatorStore: Send + Sync {
    /// Save all indicators for a project scenario.
    async fn save_all_indicators(&self, scenario_id: ScenarioId) -> Result<(), DownstreamError>;

    /// Save hexagonal/regional indicators for a regional scenario.
    async fn save_regional_indicators(
        &self,
        scenario_id: ScenarioId,
        territory_id: TerritoryId,
    ) -> Result<(), DownstreamError>;
}

/// Computes the regional population model for a new regional scenario.
#[async_trait]
pub trait RegionalModelService: Send + Sync {
    async fn calculate_regional_scenario_model(
        &self,
        territory_id: TerritoryId,
        scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError>;
}

/// Evaluates the population criterion for a freshly created project.
#[async_trait]
pub trait PopulationCriterion: Send + Sync {
    async fn process_population_criterion(
        &self,
        territory_id: TerritoryId,
        base_scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError>;
}

/// Hands derived events back to the broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), DownstreamError>;
}

/// [`EventPublisher`] that routes each event to its topic through a [`Producer`].
pub struct BrokerPublisher {
    producer: Arc<dyn Producer>,
    topics: TopicConfig,
}

impl BrokerPublisher {
    pub fn new(producer: Arc<dyn Producer>, topics: TopicConfig) -> Self {
        Self { producer, topics }
    }
}

#[async_trait]
impl EventPublisher for BrokerPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), DownstreamError> {
        let topic = self.topics.topic_for(event.kind());
        let payload = event
            .encode()
            .map_err(|e| BrokerError::Encode(e.to_string()))?;
        let key = event.partition_key();
        self.producer.send(topic, Some(&key), payload).await?;
        tracing::debug!(topic, key = %key, event_type = %event.kind(), "published event");
        Ok(())
    }
}
