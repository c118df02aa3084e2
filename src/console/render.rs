use std::path::Path;

use anyhow::Error;
use chrono::Utc;
use colored::*;
use serde_json::{Map, Value as JsonValue};

use super::{Dashboard, RiskLevel};
use crate::agents::AgentError;
use crate::llm::LlmError;
use crate::report::APP_TITLE;
use crate::report::content::{organize_whois, summarize};
use crate::search::SearchError;
use crate::types::ExtractedProduct;
use crate::whois::{WhoisError, WhoisRecord, display_value, suspicious_patterns};

const RULE_TOP: &str = "┌─────────────────────────────────────────────────────────────";
const RULE_BOTTOM: &str = "└─────────────────────────────────────────────────────────────\n";

pub fn display_welcome() {
    println!("{}", format!("🛃 {APP_TITLE}").bright_blue().bold());
    println!(
        "{}",
        "Recherche de produits suspects sur les sites marchands, extraction et enrichissement WHOIS."
            .blue()
    );
    println!(
        "{}",
        "Make sure to set LLM_API_KEY and SERPER_API_KEY environment variables.\n".blue()
    );
}

pub fn display_stage(message: &str) {
    println!("{}", format!("🔄 {message}").blue().italic());
}

pub fn display_saved(path: &Path) {
    println!("{} {}", "💾 Saved report to".bright_white(), path.display());
}

pub fn display_no_results() {
    println!(
        "{}",
        "⚠️ Aucun résultat disponible. Lancez d'abord une analyse (commande 'analyze').".bright_yellow()
    );
}

pub fn display_dashboard(dashboard: &Dashboard<'_>) {
    println!("\n{}", "📊 Tableau de bord des produits suspects".bright_green().bold());
    if let Some(category) = dashboard.category {
        println!("{} {}", "Catégorie:".green(), category.bright_white());
    }
    if dashboard.using_fallback {
        println!(
            "{}",
            "⚠️ Affichage des données de secours: l'analyse en direct n'a pas produit de résultats."
                .bright_yellow()
        );
    }

    display_metrics(dashboard.products);

    if dashboard.products.is_empty() {
        println!("{}", "✅ Aucun produit suspect dans cette plage de score.\n".green());
    }
    for (idx, product) in dashboard.products.iter().enumerate() {
        display_product(idx + 1, product);
    }

    if !dashboard.using_fallback && !dashboard.other_results.is_empty() {
        println!("{}", "🔎 Autres Possibilités de Produits".bright_cyan().bold());
        println!("{}", RULE_TOP.cyan());
        for result in dashboard.other_results {
            println!(
                "{} {} {}",
                "│".cyan(),
                format!("[{:>3}]", result.display_score).bright_white(),
                result.title.white()
            );
            println!("{}   {}", "│".cyan(), result.url.dimmed());
        }
        println!("{}", RULE_BOTTOM.cyan());
    }
}

fn display_metrics(products: &[ExtractedProduct]) {
    let summary = summarize(products);
    println!("{}", RULE_TOP.green());
    println!(
        "{} {}",
        "│ 📦 Produits analysés:".green(),
        summary.total.to_string().bright_white().bold()
    );
    println!(
        "{} {}",
        "│ 🎯 Score moyen:".green(),
        format!("{:.1}/100", summary.average).bright_white()
    );
    println!(
        "{} {}",
        "│ 🚨 Risque élevé:".green(),
        summary.high_risk.to_string().bright_red().bold()
    );
    println!("{}", RULE_BOTTOM.green());
}

fn risk_badge(score: u32) -> ColoredString {
    let level = RiskLevel::from_score(score);
    let text = format!(" {} ", level.label());
    match level {
        RiskLevel::Low => text.black().on_green(),
        RiskLevel::Medium => text.black().on_yellow(),
        RiskLevel::High => text.white().on_red().bold(),
    }
}

fn display_price(product: &ExtractedProduct) {
    let Some(current) = product.product_current_price else {
        println!("{} {}", "│ 💰 Prix:".yellow(), "Non disponible".dimmed());
        return;
    };
    let mut line = format!("{}", format!("{current:.2} DT").bright_white().bold());
    if let Some(original) = product.product_original_price
        && original > current
    {
        line.push_str(&format!(" {}", format!("{original:.2} DT").dimmed().strikethrough()));
    }
    if let Some(discount) = product.product_discount_percentage
        && discount.abs() > 0.0
    {
        line.push_str(&format!(" {}", format!(" -{:.0}% ", discount.abs()).white().on_magenta()));
    }
    println!("{} {}", "│ 💰 Prix:".yellow(), line);
}

fn whois_field(info: &Map<String, JsonValue>, key: &str) -> String {
    info.get(key)
        .map(display_value)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "Non disponible".to_string())
}

fn display_seller(product: &ExtractedProduct) {
    println!(
        "{} {}",
        "│ 🏪 Site vendeur:".yellow(),
        product.business_website.as_deref().unwrap_or("Non spécifié").white()
    );
    match &product.whois_info {
        Some(info) if info.contains_key("error") => {
            println!(
                "{} {}",
                "│ 🌐 WHOIS:".yellow(),
                format!("Erreur: {}", whois_field(info, "error")).red()
            );
        }
        Some(info) if !info.is_empty() => {
            println!("{}", "│ 🌐 WHOIS:".yellow());
            for (label, key) in [
                ("Domaine", "domain_name"),
                ("Registrar", "registrar"),
                ("Créé le", "creation_date"),
                ("Expire le", "expiration_date"),
                ("Pays", "registrant_country"),
            ] {
                println!("│   {} {}", format!("{label}:").white(), whois_field(info, key).bright_white());
            }
        }
        _ => println!("{} {}", "│ 🌐 WHOIS:".yellow(), "Non disponible".dimmed()),
    }
}

fn display_product(position: usize, product: &ExtractedProduct) {
    println!(
        "{} {}",
        format!("#{position}").bright_yellow().bold(),
        product.title_or_default().bright_white().bold()
    );
    println!("{}", RULE_TOP.yellow());
    display_price(product);
    println!(
        "{} {} {}",
        "│ 🎯 Score:".yellow(),
        format!("{}/100", product.score()).bright_white(),
        risk_badge(product.score())
    );
    if let Some(url) = &product.page_url {
        println!("{} {}", "│ 🔗 URL:".yellow(), url.white());
    }
    display_seller(product);
    if !product.suspicion_reasons.is_empty() {
        println!("{}", "│ ⚠️  Raisons de suspicion:".yellow());
        for (idx, reason) in product.suspicion_reasons.iter().enumerate() {
            println!("│   {}. {}", idx + 1, reason.white());
        }
    }
    println!("{}", RULE_BOTTOM.yellow());
}

pub fn display_whois(domain: &str, lookup: &Result<WhoisRecord, WhoisError>) {
    println!("\n{} {}", "🌐 WHOIS:".bright_cyan().bold(), domain.bright_white().bold());
    let record = match lookup {
        Ok(record) => record,
        Err(e) => {
            println!("{} {}", "❌ Error:".bright_red().bold(), e.to_string().red());
            println!("{}", whois_tip(e).red());
            println!();
            return;
        }
    };

    println!("{}", RULE_TOP.cyan());
    println!("{} {}", "│ 🏷️  Domaine interrogé:".cyan(), record.domain.white());
    println!("{} {}", "│ 🖥️  Serveur:".cyan(), record.server.white());
    for (section, rows) in organize_whois(&record.fields) {
        println!("{}", format!("│ ── {section}").cyan().bold());
        for (label, value) in rows {
            println!("│   {} {}", label.white(), value.bright_white());
        }
    }
    let indicators = suspicious_patterns(&record.fields, Utc::now());
    if !indicators.is_empty() {
        println!("{}", "│ 🚨 Indicateurs suspects:".bright_red().bold());
        for indicator in indicators {
            println!("│   • {}", indicator.red());
        }
    }
    println!("{}", RULE_BOTTOM.cyan());
}

fn whois_tip(error: &WhoisError) -> &'static str {
    match error {
        WhoisError::InvalidDomain(_) => "💡 Tip: Pass a bare domain such as 'example.tn'.",
        WhoisError::Connect { .. } | WhoisError::Io { .. } => {
            "💡 Tip: Outbound TCP port 43 may be blocked; check WHOIS_SERVER and your firewall."
        }
        WhoisError::Timeout { .. } => "💡 Tip: The WHOIS server is slow. Raise WHOIS_TIMEOUT_SECS or retry later.",
        WhoisError::NoData(_) => "💡 Tip: The registry returned nothing; the domain may not be registered.",
    }
}

pub fn display_error(error: &Error) {
    let llm_error = error.downcast_ref::<LlmError>().or_else(|| match error.downcast_ref::<AgentError>() {
        Some(AgentError::Llm(e)) => Some(e),
        _ => None,
    });
    if let Some(llm_error) = llm_error {
        display_llm_error(llm_error);
        return;
    }

    println!("{} {}", "❌ Error:".bright_red().bold(), error.to_string().red());
    if let Some(search_error) = error.downcast_ref::<SearchError>() {
        let tip = match search_error {
            SearchError::Api { status: 401 | 403, .. } => "💡 Tip: Check your SERPER_API_KEY environment variable.",
            SearchError::Api { status: 429, .. } => "💡 Tip: Serper quota reached. Wait before trying again.",
            _ => "💡 Tip: Check your internet connection and SERPER_BASE_URL.",
        };
        println!("{}", tip.red());
    } else if let Some(whois_error) = error.downcast_ref::<WhoisError>() {
        println!("{}", whois_tip(whois_error).red());
    } else {
        println!("{}", "Please check your configuration and try again.".red());
    }
    println!();
}

fn display_llm_error(error: &LlmError) {
    let user_message = error.user_message();
    match error {
        LlmError::ServerBusy => {
            println!("{}", user_message.bright_yellow().bold());
            println!("{}", "💡 Tip: Try again in a few minutes when server load is lower.".yellow());
        }
        LlmError::NetworkError { .. } => {
            println!("{}", user_message.bright_red().bold());
            println!("{}", "💡 Tip: Check your internet connection and firewall settings.".red());
        }
        LlmError::Timeout { .. } => {
            println!("{}", user_message.bright_yellow().bold());
            println!("{}", "💡 Tip: The server might be overloaded. Raise LLM_TIMEOUT_SECS or try later.".yellow());
        }
        LlmError::ApiError { status, .. } => {
            println!("{}", user_message.bright_red().bold());
            let tip = match *status {
                401 => "💡 Tip: Check your LLM_API_KEY environment variable.",
                403 => "💡 Tip: Your API key may not have access to this model.",
                429 => "💡 Tip: You've hit the rate limit. Raise STAGE_COOLDOWN_SECS or wait before retrying.",
                _ => "💡 Tip: Check LLM_BASE_URL and the model names.",
            };
            println!("{}", tip.red());
        }
        LlmError::ParseError { .. } => {
            println!("{}", user_message.bright_magenta().bold());
            println!("{}", "💡 Tip: The model answered with unexpected JSON. Try again.".magenta());
        }
        LlmError::ConfigError { .. } => {
            println!("{}", user_message.bright_red().bold());
            println!("{}", "💡 Tip: Check your environment variables and configuration.".red());
        }
    }
    println!();
}
