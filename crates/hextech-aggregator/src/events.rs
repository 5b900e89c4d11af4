//! Domain events exchanged over the broker.
//!
//! Every message is a JSON envelope tagged with its event type:
//!
//! ```json
//! {"event_type": "ScenarioIndicatorsUpdated",
//!  "payload": {"scenario_id": 42, "indicator_id": 198, "project_id": 7, "indicator_value_id": 0}}
//! ```

use crate::taxonomy::IndicatorId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ScenarioId = i64;
pub type TerritoryId = i64;
pub type ProjectId = i64;

// ============================================================================
// Payloads
// ============================================================================

/// A project was created together with its base scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCreated {
    pub project_id: ProjectId,
    pub base_scenario_id: ScenarioId,
    pub territory_id: TerritoryId,
}

/// A regional scenario was created and needs its model computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalScenarioCreated {
    pub scenario_id: ScenarioId,
    pub territory_id: TerritoryId,
}

/// One indicator of a project scenario has been (re)computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioIndicatorsUpdated {
    pub scenario_id: ScenarioId,
    pub indicator_id: IndicatorId,
    pub project_id: ProjectId,
    pub indicator_value_id: i64,
}

/// One indicator of a regional scenario has been (re)computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalScenarioIndicatorsUpdated {
    pub scenario_id: ScenarioId,
    pub territory_id: TerritoryId,
    pub indicator_id: IndicatorId,
}

// ============================================================================
// Envelope
// ============================================================================

/// Every event the service consumes or produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum DomainEvent {
    ProjectCreated(ProjectCreated),
    RegionalScenarioCreated(RegionalScenarioCreated),
    ScenarioIndicatorsUpdated(ScenarioIndicatorsUpdated),
    RegionalScenarioIndicatorsUpdated(RegionalScenarioIndicatorsUpdated),
}

/// Discriminant of [`DomainEvent`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    ProjectCreated,
    RegionalScenarioCreated,
    ScenarioIndicatorsUpdated,
    RegionalScenarioIndicatorsUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ProjectCreated,
        EventKind::RegionalScenarioCreated,
        EventKind::ScenarioIndicatorsUpdated,
        EventKind::RegionalScenarioIndicatorsUpdated,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::ProjectCreated => "ProjectCreated",
            EventKind::RegionalScenarioCreated => "RegionalScenarioCreated",
            EventKind::ScenarioIndicatorsUpdated => "ScenarioIndicatorsUpdated",
            EventKind::RegionalScenarioIndicatorsUpdated => "RegionalScenarioIndicatorsUpdated",
        }
    }

    /// Lifecycle events travel on the scenario topic, updates on the indicator topic.
    pub const fn is_lifecycle(self) -> bool {
        matches!(
            self,
            EventKind::ProjectCreated | EventKind::RegionalScenarioCreated
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ProjectCreated(_) => EventKind::ProjectCreated,
            DomainEvent::RegionalScenarioCreated(_) => EventKind::RegionalScenarioCreated,
            DomainEvent::ScenarioIndicatorsUpdated(_) => EventKind::ScenarioIndicatorsUpdated,
            DomainEvent::RegionalScenarioIndicatorsUpdated(_) => {
                EventKind::RegionalScenarioIndicatorsUpdated
            }
        }
    }

    /// Partitioning key: all events of one scenario (or project) share a partition.
    pub fn partition_key(&self) -> String {
        match self {
            DomainEvent::ProjectCreated(e) => format!("project:{}", e.project_id),
            DomainEvent::RegionalScenarioCreated(e) => format!("regional:{}", e.scenario_id),
            DomainEvent::ScenarioIndicatorsUpdated(e) => format!("scenario:{}", e.scenario_id),
            DomainEvent::RegionalScenarioIndicatorsUpdated(e) => {
                format!("regional:{}", e.scenario_id)
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<ProjectCreated> for DomainEvent {
    fn from(event: ProjectCreated) -> Self {
        DomainEvent::ProjectCreated(event)
    }
}

impl From<RegionalScenarioCreated> for DomainEvent {
    fn from(event: RegionalScenarioCreated) -> Self {
        DomainEvent::RegionalScenarioCreated(event)
    }
}

impl From<ScenarioIndicatorsUpdated> for DomainEvent {
    fn from(event: ScenarioIndicatorsUpdated) -> Self {
        DomainEvent::ScenarioIndicatorsUpdated(event)
    }
}

impl From<RegionalScenarioIndicatorsUpdated> for DomainEvent {
    fn from(event: RegionalScenarioIndicatorsUpdated) -> Self {
        DomainEvent::RegionalScenarioIndicatorsUpdated(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_envelope() {
        let raw = br#"{"event_type":"ScenarioIndicatorsUpdated","payload":{"scenario_id":42,"indicator_id":198,"project_id":7,"indicator_value_id":0}}"#;
        let event = DomainEvent::decode(raw).unwrap();
        assert_eq!(event.kind(), EventKind::ScenarioIndicatorsUpdated);
        assert_eq!(
            event,
            DomainEvent::ScenarioIndicatorsUpdated(ScenarioIndicatorsUpdated {
                scenario_id: 42,
                indicator_id: 198,
                project_id: 7,
                indicator_value_id: 0,
            })
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let raw = br#"{"event_type":"ScenarioObjectsUpdated","payload":{"scenario_id":1}}"#;
        assert!(DomainEvent::decode(raw).is_err());
    }

    #[test]
    fn scopes_partition_separately() {
        let project: DomainEvent = ScenarioIndicatorsUpdated {
            scenario_id: 42,
            indicator_id: 197,
            project_id: 1,
            indicator_value_id: 0,
        }
        .into();
        let regional: DomainEvent = RegionalScenarioIndicatorsUpdated {
            scenario_id: 42,
            territory_id: 1,
            indicator_id: 197,
        }
        .into();
        assert_ne!(project.partition_key(), regional.partition_key());
    }

    #[test]
    fn lifecycle_kinds() {
        let lifecycle: Vec<_> = EventKind::ALL
            .into_iter()
            .filter(|k| k.is_lifecycle())
            .collect();
        assert_eq!(
            lifecycle,
            vec![EventKind::ProjectCreated, EventKind::RegionalScenarioCreated]
        );
    }
}
