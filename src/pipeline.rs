use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::agents::search_engine::SearchTask;
use crate::agents::{Agent, QueriesAgent, ScrapeInput, ScrapingAgent, SearchEngineAgent, persist_json};
use crate::config::Config;
use crate::fetch::{DEFAULT_TEXT_BUDGET, PageFetcher};
use crate::llm::LlmClient;
use crate::retry::{AttemptParams, RelaxationSchedule, ResilientRunner, RunOutcome};
use crate::search::SerperClient;
use crate::types::{
    AllExtractedProducts, AnalysisRequest, ExtractedProduct, QUERIES_FILE, SCRAPED_PRODUCTS_FILE,
    SEARCH_RESULTS_FILE,
};
use crate::whois::{WhoisClient, domain_of_url};

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub run_id: Uuid,
    pub success: bool,
    pub attempts: u32,
    pub product_count: usize,
}

pub struct Pipeline {
    queries: QueriesAgent,
    search: SearchEngineAgent,
    scraping: ScrapingAgent,
    whois: WhoisClient,
    stage_cooldown: Duration,
    scraped_path: PathBuf,
}

impl Pipeline {
    /// Build every agent from the configuration. `triage` keeps the basic
    /// model in the loop of the search step.
    pub fn new(config: &Config, triage: bool) -> Result<Self> {
        let out_dir = &config.paths.output_dir;
        let basic = LlmClient::new(config.llm.clone())?;
        let extractor = LlmClient::new(config.llm_for_scraping())?;
        let serper = SerperClient::new(config.search.clone())?;
        let fetcher = PageFetcher::new(Duration::from_secs(config.search.timeout), DEFAULT_TEXT_BUDGET)?;

        Ok(Self {
            queries: QueriesAgent::new(basic.clone(), out_dir.join(QUERIES_FILE)),
            search: SearchEngineAgent::new(
                serper,
                triage.then_some(basic),
                out_dir.join(SEARCH_RESULTS_FILE),
            ),
            scraping: ScrapingAgent::new(
                extractor,
                fetcher,
                config.pacing.scrape_cooldown,
                out_dir.join(SCRAPED_PRODUCTS_FILE),
            ),
            whois: WhoisClient::new(&config.whois),
            stage_cooldown: config.pacing.stage_cooldown,
            scraped_path: out_dir.join(SCRAPED_PRODUCTS_FILE),
        })
    }

    /// The request's own threshold and result cap are the first attempt's.
    pub fn schedule_for(request: &AnalysisRequest) -> RelaxationSchedule {
        RelaxationSchedule {
            max_attempts: request.max_attempts,
            base_score_threshold: request.score_threshold,
            base_max_results: request.max_search_results.max(1),
            ..RelaxationSchedule::default()
        }
    }

    pub async fn run_analysis(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        let run_id = Uuid::new_v4();
        info!(
            "Analysis run {}: category '{}', up to {} attempts",
            run_id, request.product_category, request.max_attempts
        );

        let runner = ResilientRunner::new(Self::schedule_for(request));
        let outcome = runner.run(|params| self.run_attempt(request, params)).await;

        let attempts = outcome.attempts();
        let success = outcome.is_completed();
        let product_count = match outcome {
            RunOutcome::Completed { value, .. } => {
                info!("Analysis run {} completed on attempt {}", run_id, attempts);
                value.products.len()
            }
            RunOutcome::Exhausted { last_error, .. } => {
                match last_error {
                    Some(e) => warn!("Analysis run {} exhausted; last error: {:#}", run_id, e),
                    None => info!("Maximum attempts reached. No suspicious products detected."),
                }
                0
            }
        };

        Ok(AnalysisOutcome { run_id, success, attempts, product_count })
    }

    async fn run_attempt(
        &self,
        request: &AnalysisRequest,
        params: AttemptParams,
    ) -> Result<Option<AllExtractedProducts>> {
        let queries = self
            .queries
            .execute(request)
            .await
            .context("query generation failed")?;

        let task = SearchTask {
            queries: queries.queries,
            score_threshold: params.score_threshold,
            max_results: params.max_results,
            excluded_platforms: request.excluded_platforms.clone(),
            domain_suffix: request.domain_suffix.clone(),
        };
        let results = self.search.execute(&task).await.context("search failed")?;

        if !self.stage_cooldown.is_zero() {
            info!("Waiting {:?} before the next stage (LLM rate limit)", self.stage_cooldown);
            tokio::time::sleep(self.stage_cooldown).await;
        }

        info!("Found {} search results", results.results.len());
        if results.results.is_empty() {
            return Ok(None);
        }

        info!("Search results found! Running web scraping agent...");
        let mut scraped = self
            .scraping
            .execute(&ScrapeInput {
                search_results: results.results,
                top_recommendations: request.top_recommendations,
            })
            .await
            .context("scraping failed")?;

        enrich_with_whois(&mut scraped.products, &self.whois).await;
        persist_json(&self.scraped_path, &scraped).await?;
        Ok(Some(scraped))
    }
}

/// `scheme://host[:port]` of a product page.
pub fn business_website(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

fn whois_error(message: impl Into<String>) -> Map<String, JsonValue> {
    match json!({ "error": message.into() }) {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

/// Attach the seller site and its WHOIS record to every product. Lookups are
/// made once per registrable domain; failures are stored as `{"error": ..}`.
pub async fn enrich_with_whois(products: &mut [ExtractedProduct], whois: &WhoisClient) {
    let mut cache: HashMap<String, Map<String, JsonValue>> = HashMap::new();

    for product in products.iter_mut() {
        let Some(url) = product.page_url.clone().or_else(|| product.product_url.clone()) else {
            continue;
        };
        product.business_website = business_website(&url);

        let info = match domain_of_url(&url) {
            None => whois_error(format!("no registrable domain in {url}")),
            Some(domain) => match cache.get(&domain) {
                Some(cached) => cached.clone(),
                None => {
                    let info = match whois.lookup(&domain).await {
                        Ok(record) => record.into_json(),
                        Err(e) => {
                            warn!("WHOIS lookup for {} failed: {}", domain, e);
                            whois_error(e.to_string())
                        }
                    };
                    cache.insert(domain, info.clone());
                    info
                }
            },
        };
        product.whois_info = Some(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WhoisSettings, test_config};
    use crate::llm::completion_body;
    use crate::types::AllSearchResults;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AnalysisRequest {
        AnalysisRequest { domain_suffix: None, ..AnalysisRequest::default() }
    }

    async fn mount_llm(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("Search Queries Recommendation Agent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(r#"{"queries": ["écouteurs copie"]}"#)),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("Extract product information"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"product_title": "Écouteurs Pro", "product_current_price": 35,
                    "suspicion_reasons": ["prix bas"]}"#,
            )))
            .mount(server)
            .await;
    }

    #[test]
    fn schedule_starts_from_request() {
        let request = AnalysisRequest {
            score_threshold: 0.4,
            max_search_results: 2,
            max_attempts: 5,
            ..AnalysisRequest::default()
        };
        let schedule = Pipeline::schedule_for(&request);
        assert_eq!(schedule.max_attempts, 5);
        assert_eq!(schedule.params_for(1).max_results, 2);
        assert!((schedule.params_for(2).score_threshold - 0.36).abs() < 1e-12);
    }

    #[test]
    fn business_website_keeps_scheme_and_host() {
        assert_eq!(
            business_website("https://www.shop.tn/p/1?x=2").as_deref(),
            Some("https://www.shop.tn")
        );
        assert_eq!(business_website("nope"), None);
    }

    #[tokio::test]
    async fn full_run_scrapes_and_annotates_products() {
        let server = MockServer::start().await;
        mount_llm(&server).await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [{ "title": "Écouteurs", "link": format!("{}/produit", server.uri()) }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/produit"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><main>Écouteurs Pro 35 DT</main></body></html>"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), &server.uri(), dir.path());
        let pipeline = Pipeline::new(&config, false).unwrap();

        let outcome = pipeline.run_analysis(&request()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.product_count, 1);

        let saved: AllExtractedProducts = serde_json::from_str(
            &std::fs::read_to_string(config.paths.output_dir.join(SCRAPED_PRODUCTS_FILE)).unwrap(),
        )
        .unwrap();
        let product = &saved.products[0];
        assert_eq!(product.suspicion_score, Some(10));
        assert_eq!(product.business_website.as_deref(), Some(server.uri().as_str()));
        assert!(product.whois_info.as_ref().unwrap().contains_key("error"));
        assert!(config.paths.output_dir.join(QUERIES_FILE).exists());
    }

    #[tokio::test]
    async fn empty_search_exhausts_all_attempts() {
        let server = MockServer::start().await;
        mount_llm(&server).await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "organic": [] })))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), &server.uri(), dir.path());
        let pipeline = Pipeline::new(&config, false).unwrap();

        let outcome = pipeline.run_analysis(&request()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.product_count, 0);

        let saved: AllSearchResults = serde_json::from_str(
            &std::fs::read_to_string(config.paths.output_dir.join(SEARCH_RESULTS_FILE)).unwrap(),
        )
        .unwrap();
        assert!(saved.results.is_empty());
        assert!(!config.paths.output_dir.join(SCRAPED_PRODUCTS_FILE).exists());
    }

    #[tokio::test]
    async fn failing_query_stage_counts_as_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), &server.uri(), dir.path());
        let pipeline = Pipeline::new(&config, false).unwrap();

        let outcome = pipeline
            .run_analysis(&AnalysisRequest { max_attempts: 2, ..request() })
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn whois_is_looked_up_once_per_domain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap().to_string();
        let accepts = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(socket);
            let mut query = String::new();
            reader.read_line(&mut query).await.unwrap();
            reader
                .get_mut()
                .write_all(b"Domain Name: boutique-promo.tn\nRegistrar: Example Registrar SARL\n")
                .await
                .unwrap();
            query
        });

        let whois = WhoisClient::new(&WhoisSettings { server, timeout: 2 });
        let mut products = vec![
            ExtractedProduct {
                page_url: Some("https://www.boutique-promo.tn/p/1".into()),
                ..ExtractedProduct::default()
            },
            ExtractedProduct {
                product_url: Some("https://boutique-promo.tn/p/2".into()),
                ..ExtractedProduct::default()
            },
            ExtractedProduct::default(),
        ];

        enrich_with_whois(&mut products, &whois).await;

        assert_eq!(accepts.await.unwrap(), "boutique-promo.tn\r\n");
        for product in &products[..2] {
            let info = product.whois_info.as_ref().unwrap();
            assert_eq!(info["registrar"], "Example Registrar SARL");
        }
        assert_eq!(products[0].business_website.as_deref(), Some("https://www.boutique-promo.tn"));
        assert!(products[2].whois_info.is_none());
    }
}
