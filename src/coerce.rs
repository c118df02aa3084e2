//! Coercion of loosely-shaped LLM output into the JSON shapes the pipeline expects.

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use url::Url;

use crate::types::SearchResult;

#[derive(Debug, Error)]
pub enum CoerceError {
    #[error("no JSON value found in model output")]
    NoJson,
    #[error("invalid JSON in model output: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("no product data extracted from page")]
    EmptyProductList,
    #[error("extractor reported an error: {0}")]
    Reported(String),
    #[error("unexpected JSON shape: expected {expected}")]
    UnexpectedShape { expected: &'static str },
}

/// Cut the outermost JSON object or array out of a model reply, dropping
/// markdown fences and any prose around it.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &trimmed[s..=e],
        _ => trimmed,
    }
}

pub fn parse_model_json(raw: &str) -> Result<JsonValue, CoerceError> {
    let candidate = strip_code_fences(raw);
    if candidate.is_empty() || !(candidate.starts_with('{') || candidate.starts_with('[')) {
        return Err(CoerceError::NoJson);
    }
    Ok(serde_json::from_str(candidate)?)
}

/// Reduce an extraction result to exactly one product object.
///
/// Arrays collapse to their single element, or to the element with the highest
/// `suspicion_score` (missing scores count as zero).
pub fn coerce_product(value: JsonValue) -> Result<Map<String, JsonValue>, CoerceError> {
    let object = match value {
        JsonValue::Object(map) => map,
        JsonValue::Array(items) => {
            let mut objects: Vec<Map<String, JsonValue>> = items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            match objects.len() {
                0 => return Err(CoerceError::EmptyProductList),
                1 => objects.remove(0),
                _ => {
                    let best = objects
                        .iter()
                        .enumerate()
                        .max_by(|(_, a), (_, b)| score_of(a).total_cmp(&score_of(b)))
                        .map(|(idx, _)| idx)
                        .unwrap_or(0);
                    objects.swap_remove(best)
                }
            }
        }
        _ => return Err(CoerceError::UnexpectedShape { expected: "object or array" }),
    };

    // A wrapper such as {"products": [...]} is unwrapped one level.
    if let Some(JsonValue::Array(inner)) = object.get("products") {
        return coerce_product(JsonValue::Array(inner.clone()));
    }

    if let Some(error) = object.get("error") {
        let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        return Err(CoerceError::Reported(message));
    }

    Ok(object)
}

fn score_of(map: &Map<String, JsonValue>) -> f64 {
    map.get("suspicion_score").and_then(JsonValue::as_f64).unwrap_or(0.0)
}

/// Accepts `{"queries": [...]}`, `{"search_queries": [...]}` or a bare array.
pub fn coerce_queries(value: JsonValue) -> Result<Vec<String>, CoerceError> {
    let list = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map
            .remove("queries")
            .or_else(|| map.remove("search_queries"))
        {
            Some(JsonValue::Array(items)) => items,
            _ => return Err(CoerceError::UnexpectedShape { expected: "a 'queries' array" }),
        },
        _ => return Err(CoerceError::UnexpectedShape { expected: "a 'queries' array" }),
    };

    Ok(list
        .into_iter()
        .filter_map(|item| match item {
            JsonValue::String(s) => Some(s),
            JsonValue::Object(map) => map
                .get("query")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect())
}

/// Accepts `{"urls": [...]}`, `{"results": [{"url": ..}]}` or a bare array of
/// strings; used to read the triage verdict of the search step.
pub fn coerce_url_list(value: JsonValue) -> Result<Vec<String>, CoerceError> {
    let list = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("urls").or_else(|| map.remove("results")) {
            Some(JsonValue::Array(items)) => items,
            _ => return Err(CoerceError::UnexpectedShape { expected: "a 'urls' array" }),
        },
        _ => return Err(CoerceError::UnexpectedShape { expected: "a 'urls' array" }),
    };

    Ok(list
        .into_iter()
        .filter_map(|item| match item {
            JsonValue::String(s) => Some(s),
            JsonValue::Object(map) => map.get("url").and_then(JsonValue::as_str).map(str::to_string),
            _ => None,
        })
        .collect())
}

/// Numbers sometimes arrive as strings such as "1 299,000 DT".
pub fn normalize_numeric_fields(product: &mut Map<String, JsonValue>) {
    for field in [
        "product_current_price",
        "product_original_price",
        "product_discount_percentage",
    ] {
        let normalized = match product.get(field) {
            None | Some(JsonValue::Null | JsonValue::Number(_)) => continue,
            Some(JsonValue::String(raw)) => parse_price(raw).map(JsonValue::from),
            Some(_) => None,
        };
        product.insert(field.to_string(), normalized.unwrap_or(JsonValue::Null));
    }
    if let Some(JsonValue::String(single)) = product.get("suspicion_reasons").cloned() {
        product.insert(
            "suspicion_reasons".to_string(),
            JsonValue::Array(vec![JsonValue::String(single)]),
        );
    }
}

/// Scalars in text fields become strings; arrays and objects are dropped.
pub fn normalize_text_fields(product: &mut Map<String, JsonValue>) {
    for field in ["page_url", "product_title", "product_image_url", "product_url"] {
        let normalized = match product.get(field) {
            None | Some(JsonValue::Null | JsonValue::String(_)) => continue,
            Some(JsonValue::Array(_) | JsonValue::Object(_)) => JsonValue::Null,
            Some(other) => JsonValue::String(scalar_text(other)),
        };
        product.insert(field.to_string(), normalized);
    }
}

/// Null or malformed list fields become empty lists; reasons and specification
/// values become strings.
pub fn normalize_list_fields(product: &mut Map<String, JsonValue>) {
    let reasons = match product.remove("suspicion_reasons") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(scalar_text)
            .filter(|reason| !reason.trim().is_empty())
            .map(JsonValue::String)
            .collect(),
        _ => Vec::new(),
    };
    product.insert("suspicion_reasons".to_string(), JsonValue::Array(reasons));
    let specs = match product.remove("product_specs") {
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .filter_map(|item| {
                let name = item.get("specification_name").map(scalar_text)?;
                let value = item.get("specification_value").map(scalar_text).unwrap_or_default();
                Some(serde_json::json!({ "specification_name": name, "specification_value": value }))
            })
            .collect(),
        _ => Vec::new(),
    };
    product.insert("product_specs".to_string(), JsonValue::Array(specs));
}

fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // "1.299,000" -> thousands '.', decimal ','; "1,299.00" -> the reverse.
    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse::<f64>().ok()
}

/// `scheme://host[:port]/path`, without query or fragment.
pub fn base_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => format!(
            "{}://{}{}{}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.port().map(|port| format!(":{port}")).unwrap_or_default(),
            url.path()
        ),
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    }
}

/// Map a 0..1 search score onto the 1..10 suspicion scale.
pub fn suspicion_from_search_score(score: f64) -> u32 {
    let scaled = (score * 10.0).round();
    scaled.clamp(1.0, 10.0) as u32
}

/// Suspicion for a page, from the search result with the same base URL; 1 when unknown.
pub fn suspicion_for_url(url: &str, results: &[SearchResult]) -> u32 {
    let wanted = base_url(url);
    results
        .iter()
        .find(|r| base_url(&r.url) == wanted)
        .map(|r| suspicion_from_search_score(r.score))
        .unwrap_or(1)
}

/// Decode literal `\uXXXX` escapes (surrogate pairs included) left in model text.
pub fn decode_unicode_escapes(text: &str) -> String {
    if !text.contains("\\u") {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(high) = escape_at(&chars, i) {
            if (0xD800..0xDC00).contains(&high)
                && let Some(low) = escape_at(&chars, i + 6)
                && (0xDC00..0xE000).contains(&low)
            {
                let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                if let Some(c) = char::from_u32(combined) {
                    out.push(c);
                    i += 12;
                    continue;
                }
            }
            if let Some(c) = char::from_u32(high) {
                out.push(c);
                i += 6;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn escape_at(chars: &[char], i: usize) -> Option<u32> {
    if i + 6 > chars.len() || chars[i] != '\\' || chars[i + 1] != 'u' {
        return None;
    }
    let digits = &chars[i + 2..i + 6];
    if !digits.iter().all(char::is_ascii_hexdigit) {
        return None;
    }
    let hex: String = digits.iter().collect();
    u32::from_str_radix(&hex, 16).ok()
}
