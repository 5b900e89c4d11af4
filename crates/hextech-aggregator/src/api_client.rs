//! HTTP client for the hextech indicator saving API.
//!
//! Implements the downstream collaborator traits. Each call is a single
//! request; a 404 is reported as [`DownstreamError::NotFound`] straight away.

use crate::config::ApiConfig;
use crate::error::DownstreamError;
use crate::events::{ScenarioId, TerritoryId};
use crate::propagation::{IndicatorStore, PopulationCriterion, RegionalModelService};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

pub struct HextechApiClient {
    client: Client,
    config: ApiConfig,
}

impl HextechApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, DownstreamError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DownstreamError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn put(&self, path: &str, query: &[(&str, i64)]) -> Result<(), DownstreamError> {
        let url = self.url(path);
        let mut request = self.client.put(&url).query(query);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownstreamError::Network(e.to_string()))?;
        let status = response.status();
        tracing::debug!(url = %url, status = status.as_u16(), "api call finished");

        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError::NotFound(format!("{url}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IndicatorStore for HextechApiClient {
    async fn save_all_indicators(&self, scenario_id: ScenarioId) -> Result<(), DownstreamError> {
        self.put(
            "/indicators_saving/save_all",
            &[("scenario_id", scenario_id)],
        )
        .await
    }

    async fn save_regional_indicators(
        &self,
        scenario_id: ScenarioId,
        territory_id: TerritoryId,
    ) -> Result<(), DownstreamError> {
        self.put(
            "/indicators_saving/save_regional",
            &[("scenario_id", scenario_id), ("territory_id", territory_id)],
        )
        .await
    }
}

#[async_trait]
impl RegionalModelService for HextechApiClient {
    async fn calculate_regional_scenario_model(
        &self,
        territory_id: TerritoryId,
        scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError> {
        self.put(
            "/popframe/regional_scenario_model",
            &[("territory_id", territory_id), ("scenario_id", scenario_id)],
        )
        .await
    }
}

#[async_trait]
impl PopulationCriterion for HextechApiClient {
    async fn process_population_criterion(
        &self,
        territory_id: TerritoryId,
        base_scenario_id: ScenarioId,
    ) -> Result<(), DownstreamError> {
        self.put(
            "/population/criterion",
            &[("territory_id", territory_id), ("scenario_id", base_scenario_id)],
        )
        .await
    }
}
