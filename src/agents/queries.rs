use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::coerce::{coerce_queries, parse_model_json};
use crate::llm::{ChatMessage, LlmClient};
use crate::types::{AnalysisRequest, SuggestedSearchQueries};

use super::{Agent, AgentError, persist_json};

const SYSTEM_PROMPT: &str = r#"
You are the Search Queries Recommendation Agent working for the Tunisian Customs.
The Customs monitor online sales platforms to detect illicit products: undeclared
products, counterfeits, illegally imported goods, or products sold outside official
channels.

Your goal is to provide search queries that specifically target illicit products.
Each query must include a term indicating the illicit nature of the product, such as
'réplique', 'copie', 'contrefait', 'générique', 'non originale', 'importé
clandestinement' or 'sans déclaration'. Generic terms such as 'bas prix', 'pas cher'
or 'prix incroyable' must never be used alone: they return legitimate products.

Output ONLY a JSON object of the form {"queries": ["...", "..."]} with no commentary
or markdown.
"#;

/// Step 1: turns a product category into targeted search queries.
#[derive(Clone)]
pub struct QueriesAgent {
    client: LlmClient,
    out_path: PathBuf,
}

impl QueriesAgent {
    pub fn new(client: LlmClient, out_path: PathBuf) -> Self {
        Self { client, out_path }
    }

    fn task_description(request: &AnalysisRequest) -> String {
        let excluded = if request.excluded_platforms.is_empty() {
            "none".to_string()
        } else {
            request.excluded_platforms.join(", ")
        };
        [
            format!(
                "The Tunisian Customs is looking for illicit {} on online sales platforms.",
                request.product_category
            ),
            format!("IMPORTANT: Don't do the search on these platforms: {excluded}"),
            "The objective is to identify counterfeit, undeclared, or illegally imported products."
                .to_string(),
            "The searches must target the Tunisian market or sites accessible from Tunisia.".to_string(),
            format!("Generate a maximum of {} search queries.", request.no_keywords),
            format!("The search keywords must be in {} language.", request.language),
            "Avoid generic terms like 'low price', 'cheap', 'amazing price' alone as they may return legitimate products."
                .to_string(),
            "Target real product pages, not blogs or listing pages.".to_string(),
        ]
        .join("\n")
    }
}

/// Trim, drop blanks and case-insensitive duplicates, cap at `limit`.
pub fn clean_queries(raw: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|q| q.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(limit.max(1))
        .collect()
}

#[async_trait]
impl Agent for QueriesAgent {
    type Input = AnalysisRequest;
    type Output = SuggestedSearchQueries;

    async fn execute(&self, request: &Self::Input) -> Result<Self::Output, AgentError> {
        let user_payload = json!({
            "task": Self::task_description(request),
            "expected_output": "A JSON object containing a list of suggested search queries for detecting illicit products.",
        });

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT.trim()),
            ChatMessage::user(user_payload.to_string()),
        ];

        info!(
            "QueriesAgent: requesting up to {} queries for '{}'",
            request.no_keywords, request.product_category
        );
        let raw = self.client.send_messages(messages).await?;
        info!("QueriesAgent: received model response, parsing JSON");

        let queries = clean_queries(coerce_queries(parse_model_json(&raw)?)?, request.no_keywords);
        if queries.is_empty() {
            return Err(AgentError::Unexpected("model returned no search queries".into()));
        }

        let output = SuggestedSearchQueries { queries };
        persist_json(&self.out_path, &output).await?;
        info!(
            "QueriesAgent: saved {} queries to {}",
            output.queries.len(),
            self.out_path.display()
        );
        Ok(output)
    }
}
