//! hdc operator entry point.
//!
//! Thin wrapper over `hdc-core`. Logging goes to stderr so values printed by
//! `get` stay clean on stdout.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hdc_core::{Cache, CacheConfig, PurgeScheduler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

mod args;
mod bench;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = cli.apply(CacheConfig::load().context("loading configuration")?);
    let cache = Cache::open(config).await?;

    match cli.command {
        Commands::Get { key, output } => {
            let Some(value) = cache.get(&key).await? else {
                anyhow::bail!("miss: {key}");
            };
            match output {
                Some(path) => tokio::fs::write(&path, &value)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&value).await?;
                    stdout.flush().await?;
                }
            }
        }
        Commands::Set { key, file, entry_ttl } => {
            let value = match file {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            let ttl = entry_ttl
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("invalid --entry-ttl")?;
            cache.set(&key, &value, ttl).await?;
        }
        Commands::Has { key } => {
            println!("{}", cache.has(&key).await?.as_str());
        }
        Commands::Del { key } => {
            if !cache.del(&key).await? {
                tracing::info!(key, "key not present");
            }
        }
        Commands::Purge => {
            println!("{}", cache.purge().await?);
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats().await?)?);
        }
        Commands::Watch { .. } => {
            tracing::info!(path = %cache.path().display(), "cache located");
            let scheduler = PurgeScheduler::for_cache(cache)?;
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await;
        }
        Commands::Bench { batch, size } => {
            eprintln!("> cache located at: {}", cache.path().display());
            let report = bench::run(&cache, batch, size).await?;
            println!("writes: {} records, {:.2} μs/record", report.writes, report.write_micros_per_record());
            println!("reads:  {} records, {:.2} μs/record", report.reads, report.read_micros_per_record());
        }
    }

    Ok(())
}
