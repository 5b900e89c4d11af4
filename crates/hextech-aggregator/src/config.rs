//! Service configuration, loaded from the environment.

use crate::error::AggregatorError;
use crate::events::EventKind;
use crate::registry::CompletionMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for the indicator saving API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL including the deployment prefix, e.g. `http://hextech:8000/hextech`.
    pub base_url: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/hextech".to_string(),
            access_token: None,
            timeout_secs: 300,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Topic names are deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Project and scenario lifecycle events.
    pub scenario_events: String,
    /// Indicator update events.
    pub indicator_events: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            scenario_events: "scenario.events".to_string(),
            indicator_events: "indicator.events".to_string(),
        }
    }
}

impl TopicConfig {
    pub fn topic_for(&self, kind: EventKind) -> &str {
        if kind.is_lifecycle() {
            &self.scenario_events
        } else {
            &self.indicator_events
        }
    }

    /// Distinct topic names, lifecycle first.
    pub fn all(&self) -> Vec<String> {
        let mut topics = vec![self.scenario_events.clone()];
        if self.indicator_events != self.scenario_events {
            topics.push(self.indicator_events.clone());
        }
        topics
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub api: ApiConfig,
    pub topics: TopicConfig,
    /// Partitions per topic for the in-process broker.
    pub partitions: u32,
    pub completion_mode: CompletionMode,
    /// Upper bound on live records per registry.
    pub max_records: Option<usize>,
    pub shutdown_timeout_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            topics: TopicConfig::default(),
            partitions: 4,
            completion_mode: CompletionMode::default(),
            max_records: Some(10_000),
            shutdown_timeout_secs: 30,
        }
    }
}

impl AggregatorConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, AggregatorError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AggregatorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("HEXTECH_API_URL") {
            config.api.base_url = url;
        }
        config.api.access_token =
            lookup("URBAN_API_ACCESS_TOKEN").or_else(|| lookup("ACCESS_TOKEN"));
        if let Some(v) = lookup("HEXTECH_HTTP_TIMEOUT_SECS") {
            config.api.timeout_secs = parse_var("HEXTECH_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(topic) = lookup("HEXTECH_SCENARIO_TOPIC") {
            config.topics.scenario_events = topic;
        }
        if let Some(topic) = lookup("HEXTECH_INDICATOR_TOPIC") {
            config.topics.indicator_events = topic;
        }
        if let Some(v) = lookup("HEXTECH_PARTITIONS") {
            config.partitions = parse_var("HEXTECH_PARTITIONS", &v)?;
        }
        if let Some(v) = lookup("HEXTECH_COMPLETION_MODE") {
            config.completion_mode = v.parse().map_err(AggregatorError::Config)?;
        }
        if let Some(v) = lookup("HEXTECH_MAX_RECORDS") {
            config.max_records = match v.trim() {
                "" | "none" | "unbounded" => None,
                n => Some(parse_var("HEXTECH_MAX_RECORDS", n)?),
            };
        }
        if let Some(v) = lookup("HEXTECH_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout_secs = parse_var("HEXTECH_SHUTDOWN_TIMEOUT_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AggregatorError> {
        let url = self.api.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AggregatorError::Config(format!(
                "api base url `{url}` must start with http:// or https://"
            )));
        }
        if self.topics.scenario_events.trim().is_empty()
            || self.topics.indicator_events.trim().is_empty()
        {
            return Err(AggregatorError::Config("topic names must not be empty".into()));
        }
        if self.partitions == 0 {
            return Err(AggregatorError::Config("partitions must be at least 1".into()));
        }
        if self.max_records == Some(0) {
            return Err(AggregatorError::Config(
                "max_records must be positive (or unset)".into(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AggregatorError> {
    value
        .trim()
        .parse()
        .map_err(|_| AggregatorError::Config(format!("{name}: cannot parse `{value}`")))
}
