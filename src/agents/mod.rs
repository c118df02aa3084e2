use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),
    #[error(transparent)]
    Search(#[from] crate::search::SearchError),
    #[error(transparent)]
    Fetch(#[from] crate::fetch::FetchError),
    #[error(transparent)]
    Coerce(#[from] crate::coerce::CoerceError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("Unexpected: {0}")]
    Unexpected(String),
}

#[async_trait]
pub trait Agent {
    type Input: Send + Sync;
    type Output: Send + Sync;
    async fn execute(&self, input: &Self::Input) -> Result<Self::Output, AgentError>;
}

/// Write an agent's output as pretty JSON, creating the parent directory.
pub(crate) async fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AgentError> {
    let parent = path
        .parent()
        .ok_or_else(|| AgentError::Unexpected("invalid output path".into()))?;
    fs::create_dir_all(parent).await?;
    let pretty = serde_json::to_string_pretty(value)?;
    fs::write(path, pretty).await?;
    Ok(())
}

pub mod queries;
pub mod scraping;
pub mod search_engine;

pub use queries::QueriesAgent;
pub use scraping::{ScrapeInput, ScrapingAgent};
pub use search_engine::SearchEngineAgent;
