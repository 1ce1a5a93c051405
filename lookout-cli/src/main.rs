//! Lookout CLI
//!
//! Incident news ingestion: fetch, extract, geocode, persist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lookout_agents::{
    create_anthropic_backend, create_backend, AnthropicConfig, OpenAIBackendConfig, SharedBackend,
};
use lookout_core::{
    FetchPlan, Gazetteer, Geocoder, JsonFileStore, MemoryStore, PipelineConfig, QualityRecorder,
    SeenGuidSet, SharedStore, Tier,
};
use lookout_net::HttpTransport;
use lookout_runtime::{backfill_geocodes, PipelineOrchestrator, PipelineServices, RunReport};

/// Config file picked up when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/lookout.toml";

#[derive(Parser)]
#[command(name = "lookout")]
#[command(author, version, about = "Lookout: incident news ingestion and geocoding", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "LOOKOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass over the configured sources
    Run {
        /// Slowest tier to fetch (1 = fast only, 3 = everything)
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(1..=3))]
        max_tier: u8,

        /// Keep events in memory and leave the seen set untouched
        #[arg(long)]
        dry_run: bool,

        /// Run timeout in seconds (overrides run.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,

        /// LLM model to use
        #[arg(short, long, default_value = "claude-sonnet-4-20250514")]
        model: String,

        /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
        #[arg(long, env = "ANTHROPIC_API_KEY")]
        anthropic_key: Option<String>,

        /// OpenAI API key (or set OPENAI_API_KEY env var)
        #[arg(long, env = "OPENAI_API_KEY")]
        api_key: Option<String>,

        /// OpenRouter API key (or set OPENROUTER_API_KEY env var)
        #[arg(long, env = "OPENROUTER_API_KEY")]
        openrouter_key: Option<String>,

        /// Use OpenAI instead of Anthropic
        #[arg(long)]
        openai: bool,

        /// Use OpenRouter instead of Anthropic
        #[arg(long)]
        openrouter: bool,

        /// Use a local OpenAI-compatible server at this base URL
        #[arg(long)]
        local_url: Option<String>,
    },

    /// Resolve one location against the gazetteer
    Geocode {
        state: String,
        lga: String,
        settlement: Option<String>,
    },

    /// Re-geocode stored events that still lack coordinates
    Backfill {
        /// Maximum number of events to examine
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Show the tiered source plan
    Sources {
        /// Slowest tier to include
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(1..=3))]
        max_tier: u8,
    },

    /// Validate the configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over -v
    let log_level = match cli.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            max_tier,
            dry_run,
            timeout,
            model,
            anthropic_key,
            api_key,
            openrouter_key,
            openai,
            openrouter,
            local_url,
        } => {
            let backend = select_backend(
                &model,
                anthropic_key,
                api_key,
                openrouter_key,
                openai,
                openrouter,
                local_url,
            )?;
            run_pipeline(config, backend, tier_arg(max_tier)?, dry_run, timeout).await?;
        }
        Commands::Geocode {
            state,
            lga,
            settlement,
        } => {
            let geocoder = load_geocoder(&config)?;
            let result = geocoder.resolve(&state, &lga, settlement.as_deref());
            match (result.latitude, result.longitude) {
                (Some(lat), Some(lon)) => println!(
                    "📍 {} ({}) -> {:.4}, {:.4}",
                    result.matched_key.as_deref().unwrap_or("-"),
                    result.resolution,
                    lat,
                    lon
                ),
                _ => println!("❌ unresolved"),
            }
        }
        Commands::Backfill { limit } => {
            let store = JsonFileStore::open(&config.paths.events)
                .with_context(|| format!("opening {}", config.paths.events.display()))?;
            let geocoder = load_geocoder(&config)?;
            let quality = QualityRecorder::new(config.quality);

            let report = backfill_geocodes(&store, &geocoder, &quality, limit).await?;
            println!(
                "🗺️  Examined {} events, resolved {} (settlement {}, lga {}, state fallback {}, unresolved {})",
                report.examined,
                report.resolved,
                report.resolutions.settlement,
                report.resolutions.lga,
                report.resolutions.state_fallback,
                report.resolutions.unresolved
            );
        }
        Commands::Sources { max_tier } => {
            let plan = FetchPlan::new(&config.effective_sources(), tier_arg(max_tier)?);
            for group in plan.tiers() {
                println!("Tier {} ({})", group.tier.priority(), group.tier);
                for source in &group.sources {
                    println!("  - {} [{:?}] {}", source.name, source.kind, source.url);
                }
            }
            println!("{} active sources", plan.source_count());
        }
        Commands::CheckConfig => {
            println!("✅ Configuration OK");
            println!("   Sources: {}", config.effective_sources().len());
            println!(
                "   Politeness: {:.1}s per origin | Rate gate: {} calls, {}/s refill",
                config.politeness.min_delay_secs, config.rate_gate.capacity, config.rate_gate.refill_per_sec
            );
            println!(
                "   Batch size: {} | Retries: {} | Confidence >= {:.2}",
                config.extraction.batch_size,
                config.extraction.max_retries,
                config.extraction.confidence_threshold
            );
            println!(
                "   Seen set: {} | Events: {}",
                config.paths.seen_guids.display(),
                config.paths.events.display()
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            PipelineConfig::from_path(DEFAULT_CONFIG_PATH).context("loading default config")
        }
        None => {
            warn!("No config file found, using built-in defaults");
            Ok(PipelineConfig::default())
        }
    }
}

fn tier_arg(max_tier: u8) -> Result<Tier> {
    Tier::from_priority(max_tier).ok_or_else(|| anyhow::anyhow!("unknown tier {}", max_tier))
}

fn load_geocoder(config: &PipelineConfig) -> Result<Geocoder> {
    let gazetteer = match &config.paths.gazetteer {
        Some(path) => Gazetteer::from_path(path)
            .with_context(|| format!("loading gazetteer {}", path.display()))?,
        None => Gazetteer::embedded()?,
    };
    info!("Gazetteer loaded with {} states", gazetteer.state_count());
    Ok(Geocoder::new(gazetteer))
}

fn select_backend(
    model: &str,
    anthropic_key: Option<String>,
    api_key: Option<String>,
    openrouter_key: Option<String>,
    use_openai: bool,
    use_openrouter: bool,
    local_url: Option<String>,
) -> Result<SharedBackend> {
    let backend = if let Some(url) = local_url {
        create_backend(OpenAIBackendConfig::local(&url, model))?
    } else if use_openrouter {
        let key = openrouter_key.ok_or_else(|| {
            anyhow::anyhow!("OpenRouter API key required. Set OPENROUTER_API_KEY or use --openrouter-key")
        })?;
        create_backend(OpenAIBackendConfig::openrouter(&key, model))?
    } else if use_openai {
        let key = api_key.ok_or_else(|| {
            anyhow::anyhow!("OpenAI API key required. Set OPENAI_API_KEY or use --api-key")
        })?;
        create_backend(OpenAIBackendConfig::openai(&key, model))?
    } else {
        // Default: Anthropic
        let key = anthropic_key.ok_or_else(|| {
            anyhow::anyhow!("Anthropic API key required. Set ANTHROPIC_API_KEY or use --anthropic-key")
        })?;
        create_anthropic_backend(AnthropicConfig::new(&key, model))?
    };
    Ok(backend)
}

async fn run_pipeline(
    mut config: PipelineConfig,
    backend: SharedBackend,
    max_tier: Tier,
    dry_run: bool,
    timeout: Option<u64>,
) -> Result<()> {
    println!("🛰️  Lookout - incident ingestion\n");

    if let Some(secs) = timeout {
        config.run.timeout_secs = Some(secs);
    }

    let seen = Arc::new(
        SeenGuidSet::load(&config.paths.seen_guids)
            .with_context(|| format!("loading seen set {}", config.paths.seen_guids.display()))?,
    );
    let store: SharedStore = if dry_run {
        println!("🧪 Dry run: events stay in memory, seen set is not written");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonFileStore::open(&config.paths.events)?)
    };

    println!("📡 Model: {} | Max tier: {}", backend.model_name(), max_tier);
    println!("🗂️  Previously seen: {} articles\n", seen.len());

    let services = PipelineServices {
        backend,
        transport: HttpTransport::shared(&config.fetch)?,
        store,
        geocoder: Arc::new(load_geocoder(&config)?),
        seen,
        persist_seen: !dry_run,
    };
    let orchestrator = PipelineOrchestrator::from_config(&config, services)?;

    // Ctrl-C stops new work; in-flight requests finish
    let cancel = orchestrator.control().token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });

    let started = chrono::Utc::now();
    let report = orchestrator.run(max_tier).await?;
    let elapsed = chrono::Utc::now() - started;

    print_report(&report, elapsed.num_seconds());
    Ok(())
}

fn print_report(report: &RunReport, elapsed_secs: i64) {
    println!("\n✅ Run {} in {}s", report.state, elapsed_secs);
    if report.cancelled {
        println!("⚠️  Run was cancelled before all work was issued");
    }
    if report.quota_exhausted {
        println!("⚠️  Extraction quota exhausted; remaining articles were not extracted");
    }

    println!(
        "📰 Articles: {} new ({} relevant, {} duplicates skipped)",
        report.articles_fetched, report.relevant_articles, report.duplicates
    );
    for failure in &report.failed_sources {
        println!("   ❌ {}: {}", failure.source, failure.reason);
    }
    println!(
        "🧠 Extraction: {} calls, {} events, {} rejected, {} failed",
        report.extraction_calls, report.events_extracted, report.events_rejected, report.extraction_failures
    );
    println!(
        "🗺️  Geocoding: settlement {}, lga {}, state fallback {}, unresolved {}",
        report.resolutions.settlement,
        report.resolutions.lga,
        report.resolutions.state_fallback,
        report.resolutions.unresolved
    );
    println!("💾 Persisted {} events", report.events_persisted);

    if !report.samples.is_empty() {
        println!("\n📊 Stage health:");
        for sample in &report.samples {
            println!(
                "   {:<10} {}/{} ({:.0}%) {}",
                sample.stage.to_string(),
                sample.successes,
                sample.attempts,
                sample.success_rate * 100.0,
                sample.status
            );
        }
    }
}
