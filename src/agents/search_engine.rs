use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::coerce::{base_url, coerce_url_list, parse_model_json};
use crate::llm::{ChatMessage, LlmClient};
use crate::search::SerperClient;
use crate::types::{AllSearchResults, SearchResult};

use super::{Agent, AgentError, persist_json};

/// Candidates shown to the triage model at most.
const TRIAGE_LIMIT: usize = 20;

const TRIAGE_PROMPT: &str = r#"
You are the Search Engine Agent helping the Tunisian Customs identify illicit products
sold on online marketplaces. You receive candidate search results. Keep only the ones
that are e-commerce product pages (not blogs, category listings, forums or news),
that are not out of stock ('En rupture de stock'), and that are not suspicious links.
Focus on products that may be counterfeit, undeclared, or illegally imported.

Output ONLY a JSON object {"urls": ["...", "..."]} listing the URLs to keep, copied
exactly from the input. Do not add URLs that are not in the input.
"#;

/// What one search pass is asked to do.
#[derive(Debug, Clone)]
pub struct SearchTask {
    pub queries: Vec<String>,
    pub score_threshold: f64,
    pub max_results: usize,
    pub excluded_platforms: Vec<String>,
    pub domain_suffix: Option<String>,
}

/// Step 2: runs every query, scores hits by rank and keeps the plausible product pages.
#[derive(Clone)]
pub struct SearchEngineAgent {
    search: SerperClient,
    triage: Option<LlmClient>,
    out_path: PathBuf,
}

impl SearchEngineAgent {
    pub fn new(search: SerperClient, triage: Option<LlmClient>, out_path: PathBuf) -> Self {
        Self { search, triage, out_path }
    }

    async fn triage(&self, client: &LlmClient, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        let listing: Vec<_> = candidates
            .iter()
            .take(TRIAGE_LIMIT)
            .map(|r| json!({ "title": r.title, "url": r.url, "score": r.score }))
            .collect();
        let messages = vec![
            ChatMessage::system(TRIAGE_PROMPT.trim()),
            ChatMessage::user(json!({ "candidates": listing }).to_string()),
        ];

        let verdict = match client.send_messages(messages).await {
            Ok(raw) => parse_model_json(&raw).and_then(coerce_url_list),
            Err(e) => {
                warn!("SearchEngineAgent: triage request failed, keeping unfiltered results: {}", e);
                return candidates;
            }
        };

        match verdict {
            Ok(urls) => {
                let keep: HashSet<String> = urls.iter().map(|u| base_url(u)).collect();
                let kept: Vec<SearchResult> = candidates
                    .into_iter()
                    .take(TRIAGE_LIMIT)
                    .filter(|r| keep.contains(&base_url(&r.url)))
                    .collect();
                info!("SearchEngineAgent: triage kept {} candidates", kept.len());
                kept
            }
            Err(e) => {
                warn!("SearchEngineAgent: unreadable triage answer, keeping unfiltered results: {}", e);
                candidates
            }
        }
    }
}

fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw).ok()?.host_str().map(|h| h.to_lowercase())
}

fn host_matches(host: &str, platform: &str) -> bool {
    let platform = platform
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .trim_end_matches('/')
        .to_lowercase();
    !platform.is_empty() && (host == platform || host.ends_with(&format!(".{platform}")))
}

/// Deterministic part of the search step: domain filters, score threshold,
/// de-duplication by base URL (best score wins), ordering by score.
pub fn filter_candidates(candidates: Vec<SearchResult>, task: &SearchTask) -> Vec<SearchResult> {
    let suffix = task
        .domain_suffix
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut best: HashMap<String, SearchResult> = HashMap::new();
    for candidate in candidates {
        let Some(host) = host_of(&candidate.url) else { continue };
        if let Some(suffix) = &suffix
            && !host.ends_with(suffix.as_str())
        {
            continue;
        }
        if task.excluded_platforms.iter().any(|p| host_matches(&host, p)) {
            continue;
        }
        if candidate.score < task.score_threshold {
            continue;
        }
        let key = base_url(&candidate.url);
        match best.get(&key) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    let mut results: Vec<SearchResult> = best.into_values().collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.url.cmp(&b.url)));
    results
}

#[async_trait]
impl Agent for SearchEngineAgent {
    type Input = SearchTask;
    type Output = AllSearchResults;

    async fn execute(&self, task: &Self::Input) -> Result<Self::Output, AgentError> {
        let mut candidates = Vec::new();
        let mut answered = 0;
        let mut last_error = None;
        for query in &task.queries {
            info!("SearchEngineAgent: searching '{}'", query);
            match self.search.search(query).await {
                Ok(hits) => {
                    answered += 1;
                    candidates.extend(hits.into_iter().map(|hit| SearchResult {
                        score: hit.score(),
                        title: hit.title,
                        url: hit.url,
                        search_query: query.clone(),
                    }));
                }
                Err(e) => {
                    warn!("SearchEngineAgent: query '{}' failed: {}", query, e);
                    last_error = Some(e);
                }
            }
        }
        // Every query failing is an API problem, not an empty search.
        if answered == 0
            && let Some(e) = last_error
        {
            return Err(AgentError::Search(e));
        }
        info!("SearchEngineAgent: collected {} raw hits", candidates.len());

        let mut results = filter_candidates(candidates, task);
        if let Some(client) = &self.triage
            && !results.is_empty()
        {
            results = self.triage(client, results).await;
        }
        results.truncate(task.max_results);

        let output = AllSearchResults { results };
        persist_json(&self.out_path, &output).await?;
        info!(
            "SearchEngineAgent: saved {} results to {}",
            output.results.len(),
            self.out_path.display()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmSettings, SearchSettings};
    use crate::llm::completion_body;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn result(url: &str, score: f64) -> SearchResult {
        SearchResult {
            title: format!("title {url}"),
            url: url.to_string(),
            score,
            search_query: "q".to_string(),
        }
    }

    fn task(max_results: usize) -> SearchTask {
        SearchTask {
            queries: vec!["copie airpods".into(), "réplique montre".into()],
            score_threshold: 0.5,
            max_results,
            excluded_platforms: vec!["mail.9annas.tn".into()],
            domain_suffix: Some(".tn".into()),
        }
    }

    fn serper(base_url: &str) -> SerperClient {
        SerperClient::new(SearchSettings {
            api_key: "k".into(),
            base_url: base_url.into(),
            location: "Tunisia".into(),
            country: "tn".into(),
            language: "fr".into(),
            timeout: 5,
        })
        .unwrap()
    }

    fn llm(base_url: &str) -> LlmClient {
        LlmClient::new(LlmSettings {
            api_key: "k".into(),
            base_url: base_url.into(),
            model: "m".into(),
            temperature: 0.7,
            timeout: 5,
            max_tokens: 256,
        })
        .unwrap()
    }

    #[test]
    fn filters_domain_exclusions_threshold_and_duplicates() {
        let candidates = vec![
            result("https://shop.tn/a?utm=1", 0.6),
            result("https://shop.tn/a", 0.9),
            result("https://www.mail.9annas.tn/x", 1.0),
            result("https://amazon.fr/y", 1.0),
            result("https://low.tn/z", 0.3),
            result("not a url", 1.0),
            result("https://other.com.tn/b", 0.7),
        ];
        let kept = filter_candidates(candidates, &task(10));
        let urls: Vec<_> = kept.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://shop.tn/a", "https://other.com.tn/b"]);
    }

    #[test]
    fn no_suffix_keeps_foreign_hosts() {
        let mut t = task(10);
        t.domain_suffix = None;
        let kept = filter_candidates(vec![result("https://amazon.fr/y", 0.9)], &t);
        assert_eq!(kept.len(), 1);
    }

    async fn mount_serper(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({ "q": "copie airpods" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    { "title": "AirPods copie", "link": "https://boutique.tn/airpods" },
                    { "title": "Blog", "link": "https://blog.tn/top-10" },
                    { "title": "FR", "link": "https://exemple.fr/airpods" }
                ]
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({ "q": "réplique montre" })))
            .respond_with(ResponseTemplate::new(500))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn searches_filters_and_persists() {
        let server = MockServer::start().await;
        mount_serper(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("step_2.json");
        let agent = SearchEngineAgent::new(serper(&server.uri()), None, out.clone());

        let results = agent.execute(&task(1)).await.unwrap();
        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results[0].url, "https://boutique.tn/airpods");
        assert_eq!(results.results[0].search_query, "copie airpods");
        assert!((results.results[0].score - 1.0).abs() < 1e-9);
        assert!(out.exists());
    }

    #[tokio::test]
    async fn all_queries_failing_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("step_2.json");
        let agent = SearchEngineAgent::new(serper(&server.uri()), None, out.clone());

        let result = agent.execute(&task(3)).await;
        assert!(matches!(
            result,
            Err(AgentError::Search(crate::search::SearchError::Api { status: 403, .. }))
        ));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn triage_can_only_remove_candidates() {
        let server = MockServer::start().await;
        mount_serper(&server).await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"urls": ["https://boutique.tn/airpods", "https://invented.tn/p"]}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agent = SearchEngineAgent::new(
            serper(&server.uri()),
            Some(llm(&server.uri())),
            dir.path().join("step_2.json"),
        );

        let results = agent.execute(&task(5)).await.unwrap();
        let urls: Vec<_> = results.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://boutique.tn/airpods"]);
    }

    #[tokio::test]
    async fn triage_failure_keeps_filtered_results() {
        let server = MockServer::start().await;
        mount_serper(&server).await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agent = SearchEngineAgent::new(
            serper(&server.uri()),
            Some(llm(&server.uri())),
            dir.path().join("step_2.json"),
        );

        let results = agent.execute(&task(5)).await.unwrap();
        assert_eq!(results.results.len(), 2);
    }
}
