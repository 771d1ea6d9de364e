use anyhow::Result;
use clap::{Parser, Subcommand};
use listening_stats_api::{config::Config, db, db::Pool, init_tracing, stats};

/// listening history database inspector
#[derive(Debug, Parser)]
#[command(name = "inspect")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show table totals
    Stats,
    /// Show the ten most played artists
    TopArtists,
    /// Show plays per hour of day (UTC)
    Hours,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("inspect=debug,listening_stats_api=info");

    let args = Args::parse();
    let config = Config::from_env()?;
    let pool = db::init_db(&config).await?;

    match args.command {
        Command::Stats => show_stats(&pool).await?,
        Command::TopArtists => show_top_artists(&pool).await?,
        Command::Hours => show_hours(&pool).await?,
    }

    pool.close().await;
    Ok(())
}

async fn show_stats(pool: &Pool) -> Result<()> {
    let totals = stats::totals(pool).await?;
    let minutes = totals.total_ms_played.unwrap_or(0) as f64 / (1000.0 * 60.0);

    println!("listening history:");
    println!("  total plays: {}", totals.total_plays);
    println!("  total minutes: {:.1}", minutes);
    println!("  unique artists: {}", totals.unique_artists);
    println!("  unique tracks: {}", totals.unique_tracks);

    Ok(())
}

async fn show_top_artists(pool: &Pool) -> Result<()> {
    let artists = stats::top_artists(pool).await?;

    if artists.is_empty() {
        println!("no plays in database");
        return Ok(());
    }

    println!("top artists:");
    for (i, artist) in artists.iter().enumerate() {
        let minutes = artist.total_time_played.unwrap_or(0) as f64 / (1000.0 * 60.0);
        println!(
            "  {}. {} - {} plays ({:.1} min)",
            i + 1,
            artist.artist_name.as_deref().unwrap_or("<unknown artist>"),
            artist.play_count,
            minutes
        );
    }

    Ok(())
}

async fn show_hours(pool: &Pool) -> Result<()> {
    let patterns = stats::time_patterns(pool).await?;
    let distribution = stats::hourly_distribution(&patterns);
    let peak = distribution.iter().copied().max().unwrap_or(0).max(1);

    println!("plays per hour (UTC):");
    for (hour, count) in distribution.iter().enumerate() {
        let bar = "#".repeat((count * 40 / peak) as usize);
        println!("  {:02}:00 {:>7} {}", hour, count, bar);
    }

    let untimed: i64 = patterns
        .iter()
        .filter(|row| row.hour.is_none())
        .map(|row| row.play_count)
        .sum();
    if untimed > 0 {
        println!("  untimed {:>7}", untimed);
    }
    if let Some(hour) = stats::busiest_hour(&patterns) {
        println!("busiest hour: {:02}:00", hour);
    }

    Ok(())
}
