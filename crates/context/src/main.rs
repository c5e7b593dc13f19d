//! `answerforge` command-line entry point
//!
//! Every command prints one JSON document to stdout; logs go to stderr.

use answerforge_common::{config::AppConfig, telemetry::init_tracing, Resilience, VERSION};
use answerforge_context::PipelineOrchestrator;
use answerforge_search::{MockSource, RetrievalAggregator, SourceFetcher};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "answerforge", version)]
#[command(about = "Federated question answering over free knowledge sources")]
struct Cli {
    /// Load configuration from this file instead of the layered defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve deterministic mock sources instead of calling external APIs
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Answer a question through the full pipeline
    Ask(AskArgs),
    /// Federated search only
    Search(SearchArgs),
    /// Per-source limiter and circuit status
    Sources,
}

#[derive(Debug, Args)]
struct AskArgs {
    query: String,

    /// Extra caller context as key=value, repeatable
    #[arg(long = "context", value_parser = parse_key_value)]
    context: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct SearchArgs {
    query: String,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = false)]
    no_cache: bool,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{}`", raw))
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let path = path
                .to_str()
                .ok_or_else(|| anyhow!("config path is not valid UTF-8"))?;
            AppConfig::from_file(path).with_context(|| format!("loading config from {}", path))
        }
        None => AppConfig::load().context("loading layered configuration"),
    }
}

fn build_aggregator(
    config: &AppConfig,
    resilience: Arc<Resilience>,
    offline: bool,
) -> Result<Arc<RetrievalAggregator>> {
    let aggregator = if offline {
        let fetchers: Vec<Arc<dyn SourceFetcher>> = config
            .sources
            .enabled
            .iter()
            .map(|name| Arc::new(MockSource::echo(name.clone())) as Arc<dyn SourceFetcher>)
            .collect();
        RetrievalAggregator::new(config, fetchers, resilience)
    } else {
        RetrievalAggregator::from_config(config, resilience)?
    };
    Ok(Arc::new(aggregator))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.observability);
    answerforge_common::metrics::register_metrics();
    info!(version = VERSION, offline = cli.offline, "Starting AnswerForge");

    let resilience = Resilience::shared(&config.resilience);
    let aggregator = build_aggregator(&config, resilience.clone(), cli.offline)?;

    match cli.command {
        Commands::Ask(args) => {
            let orchestrator =
                PipelineOrchestrator::with_aggregator(&config, aggregator, resilience)?;
            let user_context: Map<String, Value> = args
                .context
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let result = orchestrator.process_query(&args.query, user_context).await;
            print_json(&result)?;
        }
        Commands::Search(args) => {
            let limit = args.limit.unwrap_or_else(|| aggregator.default_max_results());
            let results = aggregator.search(&args.query, limit, !args.no_cache).await?;
            print_json(&results)?;
        }
        Commands::Sources => {
            print_json(&json!({
                "sources": aggregator.get_source_status(),
                "circuits": resilience.circuit_status(),
                "errors": resilience.monitor().snapshot(),
            }))?;
        }
    }

    Ok(())
}
