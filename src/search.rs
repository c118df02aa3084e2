use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SearchSettings;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search client configuration error: {0}")]
    Config(String),
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search API error {status}: {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    location: &'a str,
    gl: &'a str,
    hl: &'a str,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: Option<String>,
}

/// One organic hit, in the order the engine ranked it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrganicResult {
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
    pub position: usize,
}

impl OrganicResult {
    pub fn score(&self) -> f64 {
        position_score(self.position)
    }
}

/// Rank-based relevance: 1.0 for the first hit, minus 0.1 per rank, floored at 0.1.
pub fn position_score(position: usize) -> f64 {
    (1.0 - position as f64 / 10.0).max(0.1)
}

/// Serper.dev Google search client, localised through the configured location/gl/hl.
#[derive(Debug, Clone)]
pub struct SerperClient {
    client: Client,
    settings: SearchSettings,
}

impl SerperClient {
    pub fn new(settings: SearchSettings) -> Result<Self, SearchError> {
        if settings.api_key.trim().is_empty() {
            return Err(SearchError::Config("SERPER_API_KEY is not set".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .build()
            .map_err(|e| SearchError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    pub async fn search(&self, query: &str) -> Result<Vec<OrganicResult>, SearchError> {
        let request = SerperRequest {
            q: query,
            location: &self.settings.location,
            gl: &self.settings.country,
            hl: &self.settings.language,
        };

        let response = self
            .client
            .post(format!("{}/search", self.settings.base_url))
            .header("X-API-KEY", &self.settings.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api { status: status.as_u16(), body });
        }

        let parsed: SerperResponse = response.json().await?;
        tracing::debug!("Serper returned {} organic results for '{}'", parsed.organic.len(), query);

        Ok(parsed
            .organic
            .into_iter()
            .enumerate()
            .filter(|(_, hit)| !hit.link.is_empty())
            .map(|(position, hit)| OrganicResult {
                title: hit.title,
                url: hit.link,
                snippet: hit.snippet,
                position,
            })
            .collect())
    }
}
