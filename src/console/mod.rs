use std::path::Path;

use anyhow::Error;

use crate::types::{DisplayResult, ExtractedProduct};
use crate::whois::{WhoisError, WhoisRecord};

mod render;

/// Score band shown next to every product, on the 0..=100 display scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..40 => RiskLevel::Low,
            40..70 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "Faible Risque",
            RiskLevel::Medium => "Risque Moyen",
            RiskLevel::High => "Risque Élevé",
        }
    }
}

/// What the dashboard shows for one set of results.
pub struct Dashboard<'a> {
    pub category: Option<&'a str>,
    pub products: &'a [ExtractedProduct],
    pub other_results: &'a [DisplayResult],
    pub using_fallback: bool,
}

/// Products whose display score lies in `min..=max`.
pub fn filter_products(products: &[ExtractedProduct], min: u32, max: u32) -> Vec<ExtractedProduct> {
    products
        .iter()
        .filter(|p| (min..=max).contains(&p.score()))
        .cloned()
        .collect()
}

/// Terminal front end for the analysis results
pub struct Console;

impl Console {
    pub fn display_welcome() {
        render::display_welcome();
    }

    pub fn display_stage(message: &str) {
        render::display_stage(message);
    }

    pub fn display_dashboard(dashboard: &Dashboard<'_>) {
        render::display_dashboard(dashboard);
    }

    pub fn display_no_results() {
        render::display_no_results();
    }

    pub fn display_whois(domain: &str, lookup: &Result<WhoisRecord, WhoisError>) {
        render::display_whois(domain, lookup);
    }

    pub fn display_saved(path: &Path) {
        render::display_saved(path);
    }

    /// Display an error message with context-aware messaging
    pub fn display_error(error: &Error) {
        render::display_error(error);
    }
}
