use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use kaiqu_adapters::{
    adapter_for_source, AdapterContext, AdapterSettings, FetchedPage, PayloadShape,
};
use kaiqu_sync::{render_lines, SourceStatus};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "kaiqu")]
#[command(about = "Game-server opening listing collector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every configured source once and write the output documents.
    Sync,
    /// Run one adapter over a saved payload and print the admitted records as lines.
    Parse {
        #[arg(long, value_enum)]
        shape: ShapeArg,
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShapeArg {
    Table,
    ScriptCall,
    Json,
}

impl From<ShapeArg> for PayloadShape {
    fn from(value: ShapeArg) -> Self {
        match value {
            ShapeArg::Table => PayloadShape::Table,
            ShapeArg::ScriptCall => PayloadShape::ScriptCall,
            ShapeArg::Json => PayloadShape::Json,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kaiqu=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn parse_file(shape: PayloadShape, file: &Path) -> Result<String> {
    let body = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let adapter = adapter_for_source("offline", &AdapterSettings::default_for(shape))?;
    let ctx = AdapterContext::new(Uuid::new_v4(), Local::now());
    let page = FetchedPage::new(file.display().to_string(), body);
    let records = adapter
        .parse_listing(&page, &ctx)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(render_lines(&records))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = kaiqu_sync::run_sync_once_from_env().await?;
            let failed_sources = summary
                .sources
                .iter()
                .filter(|s| s.status != SourceStatus::Ok)
                .count();
            println!(
                "sync complete: run_id={} sources={} failed_sources={}",
                summary.run_id,
                summary.sources.len(),
                failed_sources
            );
            println!(
                "  candidates={} retained={} duplicates={}",
                summary.candidates, summary.retained, summary.duplicates_dropped
            );
            for out in &summary.written {
                println!("  wrote {} ({} bytes, sha256 {})", out.path, out.bytes, out.sha256);
            }
            for failed in &summary.failed_writes {
                eprintln!("  failed {}: {}", failed.file_name, failed.error);
            }
        }
        Commands::Parse { shape, file } => {
            print!("{}", parse_file(shape.into(), &file).await?);
        }
    }

    Ok(())
}
