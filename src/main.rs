use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

mod config;
mod constants;
mod dedupe;
mod error;
mod extractor;
mod fetch;
mod logging;
mod matcher;
mod parsing;
mod pipeline;
mod publish;
mod registry;
mod shapes;
mod storage;
mod types;
mod windows;

use crate::config::Config;
use crate::pipeline::{Pipeline, RunOptions};
use crate::registry::{SourceConfig, SourceRegistry};
use crate::storage::{seed_venues, InMemoryStorage, Storage};
use crate::types::SourceRunResult;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "wien_scraper")]
#[command(about = "Vienna club event data scraper")]
#[command(version = "0.1.0")]
struct Cli {
    /// Verbose debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured sources
    Sources,
    /// Fetch and normalize events into a JSON snapshot, without publishing
    Harvest {
        /// Specific sources to run (comma-separated). Default: all enabled
        #[arg(long)]
        sources: Option<String>,
        /// Drop events dated in the past
        #[arg(long)]
        future_only: bool,
    },
    /// Run the full pipeline: harvest, publish, link venues
    Run {
        /// Specific sources to run (comma-separated). Default: all enabled
        #[arg(long)]
        sources: Option<String>,
        /// Extract and normalize but write nothing
        #[arg(long)]
        dry_run: bool,
        /// Upsert into the local store instead of the ingest endpoint
        #[arg(long)]
        direct: bool,
        /// Drop events dated in the past
        #[arg(long)]
        future_only: bool,
    },
    /// Link stored events without a venue to the venue registry
    LinkVenues {
        /// Report what would be linked without writing
        #[arg(long)]
        dry_run: bool,
    },
}

fn select_sources<'a>(
    registry: &'a SourceRegistry,
    filter: &Option<String>,
) -> Vec<&'a SourceConfig> {
    match filter {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .filter_map(|id| match registry.get(id) {
                Some(source) => Some(source),
                None => {
                    warn!("Unknown source specified: {}", id);
                    println!("⚠️  Unknown source: {}", id);
                    None
                }
            })
            .collect(),
        None => {
            let selected = registry.enabled_sources();
            let skipped = registry.len() - selected.len();
            if skipped > 0 {
                info!("Skipping {} disabled source(s)", skipped);
            }
            selected
        }
    }
}

fn print_results(results: &[SourceRunResult]) {
    for result in results {
        println!("\n📊 Pipeline Results for {}:", result.source_id);
        println!("   Found: {}", result.stats.found);
        println!("   After dedup: {}", result.stats.after_dedup);
        println!("   Inserted: {}", result.stats.inserted);
        println!("   Updated: {}", result.stats.updated);
        println!("   Errors: {}", result.errors.len());
        if let Some(file) = &result.output_file {
            println!("   Output file: {}", file);
        }

        if !result.errors.is_empty() {
            warn!("{} errors encountered during pipeline run", result.errors.len());
            println!("\n⚠️  Errors encountered:");
            for error in &result.errors {
                println!("   - {}", error);
            }
        }
    }

    if results.len() > 1 {
        let found: usize = results.iter().map(|r| r.stats.found).sum();
        let inserted: usize = results.iter().map(|r| r.stats.inserted).sum();
        let updated: usize = results.iter().map(|r| r.stats.updated).sum();
        let errors: usize = results.iter().map(|r| r.errors.len()).sum();
        println!(
            "\n📊 Total across {} sources: {} found, {} inserted, {} updated, {} errors",
            results.len(),
            found,
            inserted,
            updated,
            errors
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    logging::init_logging(cli.debug);

    let config = Config::load()?;
    let registry = SourceRegistry::load_from_directory("sources")?;
    info!("Loaded {} sources", registry.len());

    match cli.command {
        Commands::Sources => {
            println!("📋 Configured sources:");
            for id in registry.all_ids() {
                if let Some(source) = registry.get(&id) {
                    let marker = if source.enabled { "✅" } else { "⏸️" };
                    println!(
                        "   {} {} - {} ({})",
                        marker, source.source_id, source.venue.name, source.urls.events
                    );
                }
            }
        }
        Commands::Harvest {
            sources,
            future_only,
        } => {
            println!("🔄 Running harvest (no publishing)...");

            let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
            seed_venues(storage.as_ref(), "venues.json").await?;

            let pipeline = Pipeline::new(config, storage)?;
            let selected = select_sources(&registry, &sources);
            if selected.is_empty() {
                anyhow::bail!("No sources selected");
            }
            let options = RunOptions {
                skip_publish: true,
                future_only,
                debug: cli.debug,
                ..Default::default()
            };

            let results = pipeline.run_many(&selected, &options).await;
            print_results(&results);
        }
        Commands::Run {
            sources,
            dry_run,
            direct,
            future_only,
        } => {
            println!("🚀 Running full pipeline...");

            let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
            seed_venues(storage.as_ref(), "venues.json").await?;

            let pipeline = Pipeline::new(config, storage.clone())?;
            let selected = select_sources(&registry, &sources);
            if selected.is_empty() {
                anyhow::bail!("No sources selected");
            }
            let options = RunOptions {
                dry_run,
                force_direct: direct,
                future_only,
                skip_publish: false,
                debug: cli.debug,
            };

            let results = pipeline.run_many(&selected, &options).await;
            print_results(&results);
        }
        Commands::LinkVenues { dry_run } => {
            println!("🔗 Linking events to venues...");

            let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
            seed_venues(storage.as_ref(), "venues.json").await?;

            match matcher::link_unmatched(storage.as_ref(), dry_run).await {
                Ok(stats) => {
                    println!("✅ Linked {} events to venues", stats.linked);
                    println!("   Unmatched: {}", stats.unmatched);
                    if stats.errors > 0 {
                        println!("   Errors: {}", stats.errors);
                    }
                }
                Err(e) => {
                    error!("Venue linking failed: {}", e);
                    println!("❌ Venue linking failed: {}", e);
                }
            }
        }
    }
    Ok(())
}
