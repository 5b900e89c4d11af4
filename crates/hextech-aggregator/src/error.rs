//! Error taxonomy for the aggregator and its collaborators.
//!
//! Nothing here escapes a handler: every variant is caught, classified and
//! logged at the point where it occurs.

use crate::events::ScenarioId;
use crate::taxonomy::IndicatorId;

/// Failures classified at the aggregator boundary.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// The indicator id is not one of the five tracked kinds.
    #[error("unsupported indicator id {0}")]
    UnsupportedIndicator(IndicatorId),

    /// Downstream reports the scenario no longer (or never) existed.
    #[error("scenario {scenario_id} not found downstream")]
    ScenarioNotFound { scenario_id: ScenarioId },

    /// Any other downstream save/propagate failure.
    #[error("downstream failure for scenario {scenario_id}: {source}")]
    DownstreamFailure {
        scenario_id: ScenarioId,
        #[source]
        source: DownstreamError,
    },

    /// The ingress could not route a message to a handler.
    #[error("dispatch failure on {topic}[{partition}]@{offset}: {reason}")]
    DispatchFailure {
        topic: String,
        partition: u32,
        offset: u64,
        reason: String,
    },

    #[error("handler `{handler}` failed to start: {reason}")]
    Startup {
        handler: &'static str,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl AggregatorError {
    /// Classify a downstream failure for a scenario.
    pub fn from_downstream(scenario_id: ScenarioId, source: DownstreamError) -> Self {
        if source.is_not_found() {
            Self::ScenarioNotFound { scenario_id }
        } else {
            Self::DownstreamFailure {
                scenario_id,
                source,
            }
        }
    }
}

/// Errors reported by external collaborators (HTTP API, producer).
#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("publish failed: {0}")]
    Publish(#[from] BrokerError),
}

impl DownstreamError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Transport-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
    #[error("topic `{0}` already has a consumer")]
    AlreadySubscribed(String),
    #[error("broker is closed")]
    Closed,
    #[error("encode error: {0}")]
    Encode(String),
}
