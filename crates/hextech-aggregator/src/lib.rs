//! Hextech Indicator Completion Aggregator
//!
//! Consumes per-indicator "updated" events from the broker, accumulates them
//! per scenario and fires the downstream save exactly once per completion:
//!
//! ```text
//! ┌────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │ Broker │──►│ Ingress │──►│ Handler  │──►│   Scenario   │──►│ Downstream │
//! │(topics)│   │(workers)│   │(by kind) │   │   Registry   │   │ save / pub │
//! └────────┘   └─────────┘   └──────────┘   └──────────────┘   └─────┬──────┘
//!      ▲                                                             │
//!      └──────────── RegionalScenarioIndicatorsUpdated ◄─────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Order-free**: slot assignment is commutative and idempotent per kind
//! - **Serialized per scenario**: one critical section per scenario id
//! - **Bounded**: records are evicted once they fire (or by capacity)
//! - **Contained**: no event ever takes a worker down

pub mod api_client;
pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ingress;
pub mod propagation;
pub mod record;
pub mod registry;
pub mod service;
pub mod taxonomy;

pub use api_client::HextechApiClient;
pub use broker::{Broker, BrokerMessage, MemoryBroker, PartitionConsumer, Producer};
pub use config::{AggregatorConfig, ApiConfig, TopicConfig};
pub use error::{AggregatorError, BrokerError, DownstreamError};
pub use events::{
    DomainEvent, EventKind, ProjectCreated, ProjectId, RegionalScenarioCreated,
    RegionalScenarioIndicatorsUpdated, ScenarioId, ScenarioIndicatorsUpdated, TerritoryId,
};
pub use handlers::{
    HandleOutcome, HandlerLifecycle, MessageHandler, ProjectCreatedHandler,
    RegionalIndicatorsHandler, RegionalScenarioCreatedHandler, ScenarioIndicatorsHandler,
};
pub use ingress::{
    EventIngress, HandlerTable, IngressConfig, IngressSnapshot, IngressStats, MessageContext,
    RoutedEvent,
};
pub use propagation::{
    BrokerPublisher, EventPublisher, IndicatorStore, PopulationCriterion, RegionalModelService,
};
pub use record::CompletionRecord;
pub use registry::{CompletionMode, Observation, RecordHandle, ScenarioRegistry};
pub use service::{BrokerService, Collaborators};
pub use taxonomy::{IndicatorId, IndicatorKind};
