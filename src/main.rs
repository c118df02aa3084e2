mod agents;
mod coerce;
mod config;
mod console;
mod fetch;
mod llm;
mod pipeline;
mod report;
mod results;
mod retry;
mod search;
mod types;
mod whois;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;
use crate::console::{Console, Dashboard, filter_products};
use crate::pipeline::Pipeline;
use crate::report::{
    Document, analysis_document, analysis_file_name, render_pdf, whois_document, whois_file_name,
};
use crate::results::{LoadedResults, load_results, unscraped_results};
use crate::types::{AnalysisRequest, DisplayResult};
use crate::whois::{WhoisClient, lookup_target};

#[derive(Debug, Parser)]
#[command(version, about = "Détection de produits illicites sur les sites marchands")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the search, scraping and WHOIS pipeline, then show the dashboard
    Analyze(AnalyzeArgs),
    /// Show the last results (or the fallback data)
    Dashboard {
        #[arg(long, default_value_t = 0)]
        min_score: u32,
        #[arg(long, default_value_t = 100)]
        max_score: u32,
        /// Export the analysis report as PDF; it covers every loaded product, whatever the score range
        #[arg(long, default_value_t = false)]
        pdf: bool,
    },
    /// Look up a domain's registration record (a full URL is accepted)
    Whois {
        domain: String,
        #[arg(long, default_value_t = false)]
        pdf: bool,
    },
}

#[derive(Debug, ClapArgs)]
struct AnalyzeArgs {
    #[arg(long, default_value = "produits électroniques")]
    category: String,

    /// Platforms to leave out of the search (repeatable or comma separated)
    #[arg(long = "exclude", value_delimiter = ',')]
    excluded_platforms: Vec<String>,

    #[arg(long, default_value = "french")]
    language: String,

    /// Number of search queries to generate
    #[arg(long, default_value_t = 3)]
    queries: usize,

    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Minimum relevance score of the first attempt
    #[arg(long, default_value_t = 0.1)]
    threshold: f64,

    /// Result cap of the first attempt
    #[arg(long, default_value_t = 1)]
    max_results: usize,

    /// Number of pages scraped
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Keep only hosts ending with this suffix; empty string disables the filter
    #[arg(long, default_value = ".tn")]
    domain_suffix: String,

    /// Let the basic model discard irrelevant search hits
    #[arg(long, default_value_t = false)]
    llm_triage: bool,

    #[arg(long, default_value_t = false)]
    pdf: bool,
}

impl AnalyzeArgs {
    fn request(&self) -> AnalysisRequest {
        let suffix = self.domain_suffix.trim();
        AnalysisRequest {
            product_category: self.category.clone(),
            excluded_platforms: self
                .excluded_platforms
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            language: self.language.clone(),
            no_keywords: self.queries,
            score_threshold: self.threshold,
            max_search_results: self.max_results,
            top_recommendations: self.top,
            max_attempts: self.attempts.max(1),
            domain_suffix: (!suffix.is_empty()).then(|| suffix.to_string()),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    // logging
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter_layer).init();

    Console::display_welcome();

    let result = match Config::load() {
        Ok(config) => run(args.command, &config).await,
        Err(e) => Err(e),
    };

    // The error is shown once, here, and not handed back to the runtime.
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            Console::display_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Analyze(analyze) => run_analyze(config, &analyze).await,
        Command::Dashboard { min_score, max_score, pdf } => {
            run_dashboard(config, None, min_score, max_score, pdf).await
        }
        Command::Whois { domain, pdf } => run_whois(config, &domain, pdf).await,
    }
}

async fn run_analyze(config: &Config, args: &AnalyzeArgs) -> Result<()> {
    config.validate()?;
    let request = args.request();
    tracing::info!("Starting analysis for '{}'", request.product_category);

    let pipeline = Pipeline::new(config, args.llm_triage)?;
    Console::display_stage("Analyse en cours: requêtes, recherche, extraction et WHOIS...");
    let outcome = pipeline.run_analysis(&request).await?;
    tracing::info!(
        "Run {} finished after {} attempt(s): success={}, {} product(s)",
        outcome.run_id,
        outcome.attempts,
        outcome.success,
        outcome.product_count
    );

    run_dashboard(config, Some(&request.product_category), 0, 100, args.pdf).await
}

async fn run_dashboard(
    config: &Config,
    category: Option<&str>,
    min_score: u32,
    max_score: u32,
    pdf: bool,
) -> Result<()> {
    let Some(loaded) = load_results(&config.paths.output_dir, &config.paths.fallback_dir).await else {
        Console::display_no_results();
        return Ok(());
    };
    let other_results = unscraped_results(&loaded.search_results, &loaded.products);
    let shown = filter_products(&loaded.products, min_score, max_score);
    Console::display_dashboard(&Dashboard {
        category,
        products: &shown,
        other_results: &other_results,
        using_fallback: loaded.using_fallback,
    });

    if pdf {
        let now = Local::now().naive_local();
        let (file_name, doc) = dashboard_report(category, &loaded, &other_results, now);
        let path = write_pdf(&config.paths.pdf_output_dir, &file_name, &doc).await?;
        Console::display_saved(&path);
    }
    Ok(())
}

/// Analysis report over every loaded product; the score range only narrows the screen.
fn dashboard_report(
    category: Option<&str>,
    loaded: &LoadedResults,
    other_results: &[DisplayResult],
    now: NaiveDateTime,
) -> (String, Document) {
    let category = category.unwrap_or("produits");
    let doc = analysis_document(category, &loaded.products, other_results, loaded.using_fallback, now);
    (analysis_file_name(category, now), doc)
}

async fn run_whois(config: &Config, input: &str, pdf: bool) -> Result<()> {
    let domain = lookup_target(input);
    let client = WhoisClient::new(&config.whois);
    let lookup = client.lookup(&domain).await;
    Console::display_whois(&domain, &lookup);

    if pdf {
        let now = Local::now().naive_local();
        let doc = match &lookup {
            Ok(record) => whois_document(&domain, Ok(&record.fields), now),
            Err(e) => whois_document(&domain, Err(&e.to_string()), now),
        };
        let path = write_pdf(&config.paths.pdf_output_dir, &whois_file_name(&domain, now), &doc).await?;
        Console::display_saved(&path);
    }
    Ok(())
}

async fn write_pdf(dir: &Path, file_name: &str, doc: &Document) -> Result<PathBuf> {
    let bytes = render_pdf(doc)?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("could not create {}", dir.display()))?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(path)
}
