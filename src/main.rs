mod bookmarks;
mod config;
mod error;
mod fetcher;
mod llm;
#[cfg(test)]
mod loopback;
mod runner;
mod stages;
mod store;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::fetcher::HttpFetcher;
use crate::llm::LlmClient;
use crate::runner::StageReport;

#[derive(Parser)]
#[command(
    name = "bookmark-curator",
    about = "Resumable pipeline that sorts a browser bookmark export into an AI-built folder tree"
)]
struct Cli {
    /// Working directory holding the bookmark export and stage files
    #[arg(long, global = true, env = "CURATOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the bookmark export into the raw record list
    Ingest,
    /// Probe every URL for liveness and page metadata
    Enrich,
    /// Ask the model for descriptive tags per bookmark
    Tag,
    /// Ask the model for a two-level category tree from the tag corpus
    BuildTaxonomy,
    /// Place every bookmark into the category tree
    Categorize,
    /// Write the curated bookmark file
    Export,
    /// Check that no link from the original export was lost
    Verify {
        /// Original bookmark export (default: configured input)
        #[arg(long)]
        original: Option<PathBuf>,
        /// Curated bookmark file (default: configured output)
        #[arg(long = "final")]
        curated: Option<PathBuf>,
    },
    /// Show progress of each stage file
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    let paths = settings.paths();

    let result = match cli.command {
        Commands::Ingest => {
            let count = stages::ingest::run(&paths)?;
            println!("Ingested {} links into {}", count, paths.raw.display());
            Ok(())
        }
        Commands::Enrich => {
            let fetcher = HttpFetcher::new(&settings)?;
            let report = stages::enrich::run(&settings, fetcher, shutdown_signal()).await?;
            print_report("Enriched", &report, &paths.enriched);
            Ok(())
        }
        Commands::Tag => {
            let model = LlmClient::new(&settings)?;
            let report = stages::tag::run(&settings, model, shutdown_signal()).await?;
            print_report("Tagged", &report, &paths.tagged);
            Ok(())
        }
        Commands::BuildTaxonomy => {
            let model = LlmClient::new(&settings)?;
            let taxonomy = stages::taxonomy::run(&settings, model).await?;
            println!("Taxonomy with {} categories:", taxonomy.iter().count());
            for (category, subcategories) in taxonomy.iter() {
                println!("  {} ({})", category, subcategories.join(", "));
            }
            println!("Saved to {}", paths.taxonomy.display());
            Ok(())
        }
        Commands::Categorize => {
            let model = LlmClient::new(&settings)?;
            let report = stages::categorize::run(&settings, model, shutdown_signal()).await?;
            print_report("Categorized", &report, &paths.categorized);
            Ok(())
        }
        Commands::Export => {
            let count = stages::export::run(&paths)?;
            println!("Exported {} bookmarks to {}", count, paths.output_html.display());
            Ok(())
        }
        Commands::Verify { original, curated } => {
            let original = original.unwrap_or_else(|| paths.input_html.clone());
            let curated = curated.unwrap_or_else(|| paths.output_html.clone());
            let verification = stages::verify::run(&original, &curated)?;
            verification.print();
            Ok(())
        }
        Commands::Stats => {
            stages::stats::run(&paths)?.print();
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Resolves on Ctrl-C. Stages save a checkpoint before stopping.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_report(verb: &str, report: &StageReport, output: &std::path::Path) {
    println!(
        "{} {} records ({} already done, {} total), saved to {}",
        verb,
        report.processed,
        report.skipped,
        report.total,
        output.display()
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
