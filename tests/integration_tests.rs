//! Integration tests for the complete hextech pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - JSON-lines envelopes → in-process broker → ingress → handlers
//! - Regional lifecycle → regional model → republished indicator → save
//! - Configuration from the environment → service wiring
//!
//! Run with: cargo test --test integration_tests

use async_trait::async_trait;
use hextech_aggregator::{
    AggregatorConfig, BrokerPublisher, BrokerService, Collaborators, CompletionMode, DomainEvent,
    DownstreamError, EventKind, EventPublisher, IndicatorKind, IndicatorStore, MemoryBroker,
    PopulationCriterion, RegionalModelService, RegionalScenarioCreated,
    RegionalScenarioIndicatorsUpdated, ScenarioId, ScenarioIndicatorsUpdated, TerritoryId,
};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct Downstream {
    saved: Mutex<Vec<ScenarioId>>,
    saved_regional: Mutex<Vec<(ScenarioId, TerritoryId)>>,
    models: Mutex<Vec<ScenarioId>>,
    criteria: Mutex<Vec<ScenarioId>>,
}

#[async_trait]
impl IndicatorStore for Downstream {
    async fn save_all_indicators(&self, scenario_id: ScenarioId) -> Result<(), DownstreamError> {
        if scenario_id == 99 {
            return Err(DownstreamError::NotFound("scenario 99".into()));
        }
        self.saved.lock().push(scenario_id);
        Ok(())
    }

    async fn save_regional_indicators(
        &self,
        scenario_id: ScenarioId,
        territory_id: TerritoryId,
    ) -> Result<(), DownstreamError> {
        self.saved_regional.lock().push((scenario_id, territory_id));
        Ok(())
    }
}

#[async_trait]
impl RegionalModelService for Downstream {
    async fn calculate_regional_scenario_model(
        &self,
        _territory_id: TerritoryId,
        scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError> {
        // Model runs take a while; the chain must still complete.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.models.lock().push(scenario_id);
        Ok(())
    }
}

#[async_trait]
impl PopulationCriterion for Downstream {
    async fn process_population_criterion(
        &self,
        _territory_id: TerritoryId,
        base_scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError> {
        self.criteria.lock().push(base_scenario_id);
        Ok(())
    }
}

fn collaborators(downstream: &Arc<Downstream>) -> Collaborators {
    Collaborators {
        store: downstream.clone(),
        regional_model: downstream.clone(),
        population: downstream.clone(),
    }
}

fn envelope(event: impl Into<DomainEvent>) -> String {
    let bytes = event.into().encode().expect("encode");
    String::from_utf8(bytes).expect("utf8")
}

async fn run(config: AggregatorConfig, lines: &[String]) -> (Arc<Downstream>, BrokerService) {
    let downstream = Arc::new(Downstream::default());
    let broker = Arc::new(MemoryBroker::new(config.topics.all(), config.partitions));
    let publisher = BrokerPublisher::new(broker.clone(), config.topics.clone());
    let mut service = BrokerService::new(config, collaborators(&downstream), broker.clone())
        .expect("service");
    service
        .register_and_start(broker.clone())
        .await
        .expect("start");

    for line in lines {
        let event = DomainEvent::decode(line.as_bytes()).expect("decode");
        publisher.publish(event).await.expect("publish");
    }
    tokio::time::timeout(Duration::from_secs(10), broker.wait_idle())
        .await
        .expect("drained");
    service.stop().await;
    (downstream, service)
}

// ============================================================================
// JSON-lines → broker → handlers
// ============================================================================

#[tokio::test]
async fn test_jsonl_file_pipeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    {
        let mut file = std::fs::File::create(&path).unwrap();
        for (scenario_id, ids) in [(42, [198, 197, 199]), (7, [197, 198, 199])] {
            for id in ids {
                writeln!(
                    file,
                    "{}",
                    envelope(ScenarioIndicatorsUpdated {
                        scenario_id,
                        indicator_id: id,
                        project_id: 1,
                        indicator_value_id: id,
                    })
                )
                .unwrap();
            }
        }
        for id in [200, 204] {
            writeln!(
                file,
                "{}",
                envelope(ScenarioIndicatorsUpdated {
                    scenario_id: 42,
                    indicator_id: id,
                    project_id: 1,
                    indicator_value_id: id,
                })
            )
            .unwrap();
        }
    }

    let lines: Vec<String> = BufReader::new(std::fs::File::open(&path).unwrap())
        .lines()
        .map(Result::unwrap)
        .collect();
    assert_eq!(lines.len(), 8);

    let (downstream, service) = run(AggregatorConfig::default(), &lines).await;

    assert_eq!(*downstream.saved.lock(), vec![42]);
    let stats = service.stats().snapshot();
    assert_eq!(stats.committed, 8);
    assert_eq!(stats.dispatch_failures, 0);
}

#[tokio::test]
async fn test_envelope_wire_format() {
    let line = r#"{"event_type":"ScenarioIndicatorsUpdated","payload":{"scenario_id":42,"indicator_id":204,"project_id":3,"indicator_value_id":11}}"#;
    let event = DomainEvent::decode(line.as_bytes()).unwrap();
    assert_eq!(event.kind(), EventKind::ScenarioIndicatorsUpdated);
    assert_eq!(
        event,
        DomainEvent::from(ScenarioIndicatorsUpdated {
            scenario_id: 42,
            indicator_id: IndicatorKind::Engineering.id(),
            project_id: 3,
            indicator_value_id: 11,
        })
    );
}

#[tokio::test]
async fn test_missing_scenario_does_not_stop_the_pipeline() {
    let mut lines = Vec::new();
    for scenario_id in [99, 100] {
        for kind in IndicatorKind::ALL {
            lines.push(envelope(ScenarioIndicatorsUpdated {
                scenario_id,
                indicator_id: kind.id(),
                project_id: 1,
                indicator_value_id: 0,
            }));
        }
    }

    let (downstream, service) = run(AggregatorConfig::default(), &lines).await;

    assert_eq!(*downstream.saved.lock(), vec![100]);
    assert_eq!(service.stats().snapshot().committed, 10);
}

// ============================================================================
// Regional chain
// ============================================================================

#[tokio::test]
async fn test_regional_chain_on_shared_topic() {
    let config = AggregatorConfig {
        topics: hextech_aggregator::TopicConfig {
            scenario_events: "events".into(),
            indicator_events: "events".into(),
        },
        partitions: 2,
        ..AggregatorConfig::default()
    };

    let mut lines = vec![envelope(RegionalScenarioCreated {
        scenario_id: 757,
        territory_id: 17324,
    })];
    for kind in IndicatorKind::ALL
        .into_iter()
        .filter(|k| *k != IndicatorKind::Population)
    {
        lines.push(envelope(RegionalScenarioIndicatorsUpdated {
            scenario_id: 757,
            territory_id: 17324,
            indicator_id: kind.id(),
        }));
    }

    let (downstream, _service) = run(config, &lines).await;

    assert_eq!(*downstream.models.lock(), vec![757]);
    assert_eq!(*downstream.saved_regional.lock(), vec![(757, 17324)]);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_config_from_lookup_wires_service() {
    let config = AggregatorConfig::from_lookup(|name| match name {
        "HEXTECH_COMPLETION_MODE" => Some("latch".to_string()),
        "HEXTECH_PARTITIONS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.completion_mode, CompletionMode::Latch);

    let mut lines = Vec::new();
    for _ in 0..2 {
        for kind in IndicatorKind::ALL {
            lines.push(envelope(ScenarioIndicatorsUpdated {
                scenario_id: 5,
                indicator_id: kind.id(),
                project_id: 1,
                indicator_value_id: 0,
            }));
        }
    }

    let (downstream, _service) = run(config, &lines).await;
    assert_eq!(*downstream.saved.lock(), vec![5]);
}
