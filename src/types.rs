use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const QUERIES_FILE: &str = "step_1_suggested_search_queries.json";
pub const SEARCH_RESULTS_FILE: &str = "step_2_search_results.json";
pub const SCRAPED_PRODUCTS_FILE: &str = "step_3_scraped_products.json";

/// Everything one analysis run is parameterised with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub product_category: String,
    #[serde(default)]
    pub excluded_platforms: Vec<String>,
    pub language: String,
    pub no_keywords: usize,
    pub score_threshold: f64,
    pub max_search_results: usize,
    pub top_recommendations: usize,
    /// Bounded number of pipeline attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Only keep result hosts ending with this suffix (e.g. ".tn")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_suffix: Option<String>,
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            product_category: "produits électroniques".to_string(),
            excluded_platforms: Vec::new(),
            language: "french".to_string(),
            no_keywords: 3,
            score_threshold: 0.1,
            max_search_results: 1,
            top_recommendations: 5,
            max_attempts: default_max_attempts(),
            domain_suffix: Some(".tn".to_string()),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuggestedSearchQueries {
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    /// Relevance in [0, 1]
    pub score: f64,
    pub search_query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AllSearchResults {
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSpec {
    pub specification_name: String,
    pub specification_value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedProduct {
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub product_title: Option<String>,
    #[serde(default)]
    pub product_image_url: Option<String>,
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(default)]
    pub product_current_price: Option<f64>,
    #[serde(default)]
    pub product_original_price: Option<f64>,
    #[serde(default)]
    pub product_discount_percentage: Option<f64>,
    #[serde(default)]
    pub product_specs: Vec<ProductSpec>,
    /// 1..=10 as produced by the pipeline; 0..=100 once scaled for display
    #[serde(default, deserialize_with = "lenient_score")]
    pub suspicion_score: Option<u32>,
    #[serde(default)]
    pub suspicion_reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whois_info: Option<Map<String, JsonValue>>,
}

impl ExtractedProduct {
    pub fn score(&self) -> u32 {
        self.suspicion_score.unwrap_or(0)
    }

    pub fn title_or_default(&self) -> &str {
        self.product_title.as_deref().unwrap_or("Non spécifié")
    }
}

/// Saved scores may be floats (`7.5`); they are rounded, negatives become 0.
fn lenient_score<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let score = Option::<f64>::deserialize(deserializer)?;
    Ok(score
        .filter(|s| s.is_finite())
        .map(|s| s.round().clamp(0.0, u32::MAX as f64) as u32))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AllExtractedProducts {
    pub products: Vec<ExtractedProduct>,
}

/// Search hit shown next to the scraped products, score scaled to 0..=100.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayResult {
    pub title: String,
    pub url: String,
    pub display_score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_tolerates_missing_and_null_fields() {
        let raw = r#"{
            "page_url": "https://shop.tn/p/1",
            "product_title": "Casque X",
            "product_current_price": 49.9,
            "product_original_price": null,
            "suspicion_reasons": ["prix bas"]
        }"#;
        let product: ExtractedProduct = serde_json::from_str(raw).unwrap();
        assert_eq!(product.title_or_default(), "Casque X");
        assert_eq!(product.product_original_price, None);
        assert!(product.product_specs.is_empty());
        assert_eq!(product.score(), 0);
    }

    #[test]
    fn fractional_scores_are_rounded() {
        let saved = r#"{"products": [
            {"product_title": "a", "suspicion_score": 7.5},
            {"product_title": "b", "suspicion_score": 3},
            {"product_title": "c", "suspicion_score": null},
            {"product_title": "d", "suspicion_score": -2.0}
        ]}"#;
        let all: AllExtractedProducts = serde_json::from_str(saved).unwrap();
        let scores: Vec<_> = all.products.iter().map(|p| p.suspicion_score).collect();
        assert_eq!(scores, vec![Some(8), Some(3), None, Some(0)]);
    }

    #[test]
    fn enrichment_fields_are_omitted_until_set() {
        let json = serde_json::to_value(ExtractedProduct::default()).unwrap();
        assert!(json.get("whois_info").is_none());
        assert!(json.get("business_website").is_none());
    }
}
