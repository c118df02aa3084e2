//! Product page fetching: HTTP GET plus main-content text extraction.
//!
//! Static HTML only; pages that need JavaScript to render their product
//! block come back with whatever the server sent.

use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Characters of page text handed to the extraction model.
pub const DEFAULT_TEXT_BUDGET: usize = 12_000;

const MAIN_SELECTORS: &[&str] = &[
    ".product-details",
    ".product-info",
    "#product",
    ".product",
    "[itemtype*='schema.org/Product']",
    "main",
    "article",
    "[role='main']",
    "#content",
];

const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "iframe", "svg",
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetcher configuration error: {0}")]
    Config(String),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("no readable text on {url}")]
    Empty { url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub url: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    text_budget: usize,
}

impl PageFetcher {
    pub fn new(timeout: Duration, text_budget: usize) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-FR,fr;q=0.9,en;q=0.5"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;

        Ok(Self { client, text_budget })
    }

    pub async fn fetch(&self, url: &str) -> Result<PageContent, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request { url: url.to_string(), source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }

        let html = response
            .text()
            .await
            .map_err(|source| FetchError::Request { url: url.to_string(), source })?;

        let page = extract_page(url, &html, self.text_budget);
        if page.text.is_empty() {
            return Err(FetchError::Empty { url: url.to_string() });
        }
        tracing::debug!("Fetched {} ({} chars of text)", url, page.text.len());
        Ok(page)
    }
}

pub fn extract_page(url: &str, html: &str, text_budget: usize) -> PageContent {
    let document = Html::parse_document(html);

    let title = select_first(&document, "title")
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let image_url = select_first(&document, "meta[property='og:image']")
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string);

    let root = MAIN_SELECTORS
        .iter()
        .find_map(|sel| select_first(&document, sel))
        .or_else(|| select_first(&document, "body"))
        .unwrap_or_else(|| document.root_element());

    let text = truncate_chars(&collapse_whitespace(&visible_text(root)), text_budget);

    PageContent { url: url.to_string(), title, image_url, text }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
