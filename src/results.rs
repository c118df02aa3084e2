//! Loading of the last pipeline artifacts for display, with the shipped
//! fallback directory standing in when the output directory has nothing usable.

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::coerce::decode_unicode_escapes;
use crate::types::{
    AllExtractedProducts, AllSearchResults, DisplayResult, ExtractedProduct, SCRAPED_PRODUCTS_FILE,
    SEARCH_RESULTS_FILE, SearchResult,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedResults {
    /// Scores already on the 0..=100 display scale
    pub products: Vec<ExtractedProduct>,
    pub search_results: Vec<SearchResult>,
    pub using_fallback: bool,
}

enum Artifact<T> {
    Loaded(T),
    Missing,
    Malformed,
}

async fn read_artifact<T: DeserializeOwned>(path: &Path) -> Artifact<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(_) => return Artifact::Missing,
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Artifact::Loaded(value),
        Err(e) => {
            warn!("Could not parse {}: {}", path.display(), e);
            Artifact::Malformed
        }
    }
}

/// Products from step 3 and search results from step 2, output directory first.
/// Returns `None` when neither directory holds readable products.
pub async fn load_results(output_dir: &Path, fallback_dir: &Path) -> Option<LoadedResults> {
    let (scraped, using_fallback) =
        match read_artifact::<AllExtractedProducts>(&output_dir.join(SCRAPED_PRODUCTS_FILE)).await {
            Artifact::Loaded(scraped) => (scraped, false),
            Artifact::Missing | Artifact::Malformed => {
                match read_artifact(&fallback_dir.join(SCRAPED_PRODUCTS_FILE)).await {
                    Artifact::Loaded(scraped) => {
                        info!("Using fallback data for scraped products");
                        (scraped, true)
                    }
                    Artifact::Missing | Artifact::Malformed => return None,
                }
            }
        };

    let search_results = read_search_results(&[output_dir, fallback_dir]).await;

    Some(LoadedResults {
        products: scraped.products.into_iter().map(for_display).collect(),
        search_results,
        using_fallback,
    })
}

async fn read_search_results(dirs: &[&Path]) -> Vec<SearchResult> {
    for dir in dirs {
        if let Artifact::Loaded(all) = read_artifact::<AllSearchResults>(&dir.join(SEARCH_RESULTS_FILE)).await {
            return all.results;
        }
    }
    Vec::new()
}

fn for_display(mut product: ExtractedProduct) -> ExtractedProduct {
    product.suspicion_score = Some(product.score().min(10) * 10);
    product.suspicion_reasons = product
        .suspicion_reasons
        .iter()
        .map(|reason| decode_unicode_escapes(reason))
        .collect();
    product
}

/// Search hits that were not scraped, scored on the 0..=100 scale.
pub fn unscraped_results(search_results: &[SearchResult], products: &[ExtractedProduct]) -> Vec<DisplayResult> {
    let scraped: HashSet<&str> = products.iter().filter_map(|p| p.page_url.as_deref()).collect();
    search_results
        .iter()
        .filter(|r| !scraped.contains(r.url.as_str()))
        .map(|r| DisplayResult {
            title: r.title.clone(),
            url: r.url.clone(),
            display_score: (r.score * 100.0).round().clamp(0.0, 100.0) as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PRODUCTS: &str = r#"{"products": [{
        "page_url": "https://shop.tn/a",
        "product_title": "Casque",
        "suspicion_score": 7,
        "suspicion_reasons": ["Prix tr\\u00e8s bas"]
    }]}"#;

    const SEARCH: &str = r#"{"results": [
        {"title": "Casque", "url": "https://shop.tn/a", "score": 0.7, "search_query": "q"},
        {"title": "Montre", "url": "https://shop.tn/b", "score": 0.456, "search_query": "q"}
    ]}"#;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn prefers_output_directory() {
        let root = tempfile::tempdir().unwrap();
        let (out, fallback) = (root.path().join("out"), root.path().join("fallback"));
        write(&out, SCRAPED_PRODUCTS_FILE, PRODUCTS);
        write(&out, SEARCH_RESULTS_FILE, SEARCH);
        write(&fallback, SCRAPED_PRODUCTS_FILE, r#"{"products": []}"#);

        let loaded = load_results(&out, &fallback).await.unwrap();
        assert!(!loaded.using_fallback);
        assert_eq!(loaded.products[0].suspicion_score, Some(70));
        assert_eq!(loaded.products[0].suspicion_reasons, vec!["Prix très bas"]);
        assert_eq!(loaded.search_results.len(), 2);
    }

    #[tokio::test]
    async fn malformed_output_falls_back() {
        let root = tempfile::tempdir().unwrap();
        let (out, fallback) = (root.path().join("out"), root.path().join("fallback"));
        write(&out, SCRAPED_PRODUCTS_FILE, "{ not json");
        write(&out, SEARCH_RESULTS_FILE, SEARCH);
        write(&fallback, SCRAPED_PRODUCTS_FILE, PRODUCTS);

        let loaded = load_results(&out, &fallback).await.unwrap();
        assert!(loaded.using_fallback);
        assert_eq!(loaded.products.len(), 1);
        assert_eq!(loaded.search_results.len(), 2);
    }

    #[tokio::test]
    async fn nothing_anywhere_is_none() {
        let root = tempfile::tempdir().unwrap();
        assert!(load_results(&root.path().join("a"), &root.path().join("b")).await.is_none());
    }

    #[test]
    fn unscraped_excludes_scraped_pages() {
        let search: AllSearchResults = serde_json::from_str(SEARCH).unwrap();
        let products: AllExtractedProducts = serde_json::from_str(PRODUCTS).unwrap();
        let other = unscraped_results(&search.results, &products.products);
        assert_eq!(
            other,
            vec![DisplayResult {
                title: "Montre".into(),
                url: "https://shop.tn/b".into(),
                display_score: 46,
            }]
        );
    }
}
