use anyhow::Context;
use clap::Parser;
use listening_stats_api::{config::Config, db, ingest, init_tracing};
use std::path::PathBuf;

/// Import a listening-history export (a JSON array of plays) into the database.
#[derive(Debug, Parser)]
#[command(name = "import_history")]
struct Args {
    /// Exported JSON file, e.g. Streaming_History_Audio_2023.json
    file: PathBuf,

    /// Records per transaction (defaults to CHUNK_SIZE)
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("import_history=info,listening_stats_api=info");

    let args = Args::parse();
    let config = Config::from_env().context("invalid configuration")?;
    let chunk_size = args.chunk_size.unwrap_or(config.chunk_size);

    let pool = db::init_db(&config)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database connection established ({}).", pool.backend());

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    tracing::info!(
        "Read {} bytes from {}. Importing...",
        bytes.len(),
        args.file.display()
    );

    let summary = ingest::ingest_json(&pool, &bytes, chunk_size)
        .await
        .context("Failed to import listening history")?;

    for rejection in summary.rejections.iter().take(10) {
        tracing::info!("  skipped record {}: {}", rejection.index, rejection.reason);
    }
    if summary.rejections.len() > 10 {
        tracing::info!("  ... and {} more", summary.rejections.len() - 10);
    }

    tracing::info!(
        "Successfully imported {} plays from {} ({} skipped, {} chunks).",
        summary.inserted,
        args.file.display(),
        summary.skipped,
        summary.chunks_committed
    );

    pool.close().await;
    Ok(())
}
