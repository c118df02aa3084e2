use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, warn};

use crate::coerce::{
    coerce_product, normalize_list_fields, normalize_numeric_fields, normalize_text_fields, parse_model_json,
    suspicion_for_url,
};
use crate::fetch::{PageContent, PageFetcher};
use crate::llm::{ChatMessage, LlmClient};
use crate::types::{AllExtractedProducts, ExtractedProduct, SearchResult};

use super::{Agent, AgentError, persist_json};

const PRODUCT_SCHEMA: &str = r#"{
  "page_url": "string, the original url of the product page",
  "product_title": "string",
  "product_image_url": "string",
  "product_url": "string",
  "product_current_price": "number",
  "product_original_price": "number or null, price before discount",
  "product_discount_percentage": "number or null",
  "product_specs": [{"specification_name": "string", "specification_value": "string"}],
  "suspicion_reasons": ["string"]
}"#;

const EXTRACTION_INSTRUCTION: &str = "Extract product information from this e-commerce product page. \
Extract exactly one product object with whatever information is available. Include title, image URL, \
product URL, current price, original price if discounted, discount percentage and 1 to 5 key \
specifications useful for authenticity verification. Also provide suspicion reasons based on available \
data and indicators like low price, missing brand info, or suspicious seller. Do not assign \
suspicion_score. All fields are optional. Output only the raw JSON object.";

#[derive(Debug, Clone)]
pub struct ScrapeInput {
    pub search_results: Vec<SearchResult>,
    pub top_recommendations: usize,
}

/// Step 3: fetches the best-ranked pages and extracts one product from each.
#[derive(Clone)]
pub struct ScrapingAgent {
    client: LlmClient,
    fetcher: PageFetcher,
    cooldown: Duration,
    out_path: PathBuf,
}

impl ScrapingAgent {
    pub fn new(client: LlmClient, fetcher: PageFetcher, cooldown: Duration, out_path: PathBuf) -> Self {
        Self { client, fetcher, cooldown, out_path }
    }

    async fn extract(&self, url: &str, results: &[SearchResult]) -> Result<ExtractedProduct, AgentError> {
        let page = self.fetcher.fetch(url).await?;

        let messages = vec![
            ChatMessage::system(format!("{EXTRACTION_INSTRUCTION}\n\nSchema:\n{PRODUCT_SCHEMA}")),
            ChatMessage::user(json!({ "page_url": page.url, "page_title": page.title, "page_text": page.text }).to_string()),
        ];
        let raw = self.client.send_messages(messages).await?;

        let mut product = coerce_product(parse_model_json(&raw)?)?;
        normalize_numeric_fields(&mut product);
        normalize_text_fields(&mut product);
        normalize_list_fields(&mut product);
        fill_from_page(&mut product, &page);
        product.insert("suspicion_score".to_string(), json!(suspicion_for_url(url, results)));

        Ok(serde_json::from_value(JsonValue::Object(product))?)
    }
}

/// Page-level facts win over nothing: only empty fields are filled.
fn fill_from_page(product: &mut Map<String, JsonValue>, page: &PageContent) {
    let mut fill = |key: &str, value: Option<&String>| {
        let missing = match product.get(key) {
            None | Some(JsonValue::Null) => true,
            Some(JsonValue::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing && let Some(value) = value {
            product.insert(key.to_string(), JsonValue::String(value.clone()));
        }
    };
    fill("page_url", Some(&page.url));
    fill("product_url", Some(&page.url));
    fill("product_title", page.title.as_ref());
    fill("product_image_url", page.image_url.as_ref());
}

/// The `limit` best-scored results, best first.
pub fn top_results(results: &[SearchResult], limit: usize) -> Vec<SearchResult> {
    let mut ranked = results.to_vec();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(limit);
    ranked
}

#[async_trait]
impl Agent for ScrapingAgent {
    type Input = ScrapeInput;
    type Output = AllExtractedProducts;

    async fn execute(&self, input: &Self::Input) -> Result<Self::Output, AgentError> {
        let targets = top_results(&input.search_results, input.top_recommendations);
        info!("ScrapingAgent: extracting {} pages with {}", targets.len(), self.client.model());

        let mut products = Vec::new();
        for target in &targets {
            match self.extract(&target.url, &input.search_results).await {
                Ok(product) => {
                    info!("ScrapingAgent: extracted '{}' from {}", product.title_or_default(), target.url);
                    products.push(product);
                }
                Err(e) => warn!("ScrapingAgent: skipping {}: {}", target.url, e),
            }
            // Rate limit of the extraction model; applies to failures too.
            if !self.cooldown.is_zero() {
                tokio::time::sleep(self.cooldown).await;
            }
        }

        let output = AllExtractedProducts { products };
        persist_json(&self.out_path, &output).await?;
        info!(
            "ScrapingAgent: saved {} products to {}",
            output.products.len(),
            self.out_path.display()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmSettings;
    use crate::fetch::DEFAULT_TEXT_BUDGET;
    use crate::llm::completion_body;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> LlmClient {
        LlmClient::new(LlmSettings {
            api_key: "k".into(),
            base_url: base_url.into(),
            model: "gemini-2.5-flash".into(),
            temperature: 0.0,
            timeout: 5,
            max_tokens: 1024,
        })
        .unwrap()
    }

    fn agent(server: &MockServer, out: PathBuf) -> ScrapingAgent {
        let fetcher = PageFetcher::new(Duration::from_secs(5), DEFAULT_TEXT_BUDGET).unwrap();
        ScrapingAgent::new(client(&server.uri()), fetcher, Duration::ZERO, out)
    }

    fn hit(url: String, score: f64) -> SearchResult {
        SearchResult { title: "t".into(), url, score, search_query: "q".into() }
    }

    #[test]
    fn top_results_orders_by_score() {
        let results = vec![
            hit("https://a.tn".into(), 0.2),
            hit("https://b.tn".into(), 0.9),
            hit("https://c.tn".into(), 0.5),
        ];
        let top: Vec<_> = top_results(&results, 2).into_iter().map(|r| r.url).collect();
        assert_eq!(top, vec!["https://b.tn", "https://c.tn"]);
    }

    #[test]
    fn page_fills_only_missing_fields() {
        let mut product = json!({ "product_title": "Modèle", "product_image_url": "" })
            .as_object()
            .cloned()
            .unwrap();
        let page = PageContent {
            url: "https://shop.tn/p".into(),
            title: Some("Titre page".into()),
            image_url: Some("https://cdn/i.jpg".into()),
            text: "x".into(),
        };
        fill_from_page(&mut product, &page);
        assert_eq!(product["product_title"], "Modèle");
        assert_eq!(product["product_image_url"], "https://cdn/i.jpg");
        assert_eq!(product["page_url"], "https://shop.tn/p");
    }

    #[tokio::test]
    async fn extracts_scores_and_skips_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/produit"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><head><title>Montre</title></head><body><main>Montre Rolex 99 DT</main></body></html>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"[{"product_title": "Rolex Submariner", "product_current_price": "99 DT",
                     "suspicion_score": 2, "suspicion_reasons": "prix anormalement bas"}]"#,
            )))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("step_3.json");
        let input = ScrapeInput {
            search_results: vec![
                hit(format!("{}/produit?ref=1", server.uri()), 0.8),
                hit(format!("{}/gone", server.uri()), 0.9),
                hit(format!("{}/never", server.uri()), 0.1),
            ],
            top_recommendations: 2,
        };

        let output = agent(&server, out.clone()).execute(&input).await.unwrap();
        assert_eq!(output.products.len(), 1);
        let product = &output.products[0];
        assert_eq!(product.product_title.as_deref(), Some("Rolex Submariner"));
        assert_eq!(product.product_current_price, Some(99.0));
        assert_eq!(product.suspicion_score, Some(8));
        assert_eq!(product.suspicion_reasons, vec!["prix anormalement bas"]);
        assert!(product.page_url.as_deref().unwrap().ends_with("/produit?ref=1"));

        let saved: AllExtractedProducts =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(saved.products.len(), 1);
    }

    #[tokio::test]
    async fn mistyped_fields_do_not_drop_the_product() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/casque"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><head><title>Casque</title></head><body><main>Casque 45 DT</main></body></html>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"product_title": 4500, "product_current_price": [45],
                    "suspicion_reasons": ["logo altéré", 3, null]}"#,
            )))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = ScrapeInput {
            search_results: vec![hit(format!("{}/casque", server.uri()), 0.6)],
            top_recommendations: 1,
        };
        let output = agent(&server, dir.path().join("s.json")).execute(&input).await.unwrap();
        assert_eq!(output.products.len(), 1);
        let product = &output.products[0];
        assert_eq!(product.product_title.as_deref(), Some("4500"));
        assert_eq!(product.product_current_price, None);
        assert_eq!(product.suspicion_reasons, vec!["logo altéré", "3"]);
        assert_eq!(product.suspicion_score, Some(6));
    }

    #[tokio::test]
    async fn reported_extraction_error_yields_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><p>texte</p></body></html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"error": "Failed to extract structured data"}"#,
            )))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = ScrapeInput {
            search_results: vec![hit(format!("{}/p", server.uri()), 0.5)],
            top_recommendations: 5,
        };
        let output = agent(&server, dir.path().join("s.json")).execute(&input).await.unwrap();
        assert!(output.products.is_empty());
    }
}
