//! Command-line surface for `hdc`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hdc_core::CacheConfig;

#[derive(Parser, Debug)]
#[command(name = "hdc", version, about = "Hybrid disk cache operator tool", long_about = None)]
pub struct Cli {
    /// Cache root directory (overrides HDC_PATH)
    #[arg(long, global = true)]
    pub path: Option<PathBuf>,

    /// Index database path, `:memory:` for an ephemeral index (overrides HDC_DB_PATH)
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Default seconds until an entry goes stale (overrides HDC_TTL)
    #[arg(long, global = true)]
    pub ttl: Option<f64>,

    /// Seconds a stale entry is kept before purge (overrides HDC_TBD)
    #[arg(long, global = true)]
    pub tbd: Option<f64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a cached value to stdout (or a file)
    Get {
        key: String,
        /// Write the value here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Store a value read from a file, or stdin when no file is given
    Set {
        key: String,
        file: Option<PathBuf>,
        /// Seconds until this entry goes stale
        #[arg(long = "entry-ttl")]
        entry_ttl: Option<f64>,
    },
    /// Report hit, stale or miss for a key
    Has { key: String },
    /// Delete a key and its blob
    Del { key: String },
    /// Delete entries past their stale window and reclaim empty directories
    Purge,
    /// Print index statistics as JSON
    Stats,
    /// Run scheduled purges until interrupted
    Watch {
        /// Seconds between sweeps (default: min(tbd, 3600))
        #[arg(long)]
        interval: Option<f64>,
    },
    /// Measure write and read throughput
    Bench {
        /// Rounds over the payload set
        #[arg(long, default_value_t = 3000)]
        batch: usize,
        /// Largest payload is 5 * 10^size bytes
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=8))]
        size: u32,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, mut config: CacheConfig) -> CacheConfig {
        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        if let Some(db_path) = &self.db_path {
            config.db_path = Some(db_path.clone());
        }
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        if let Some(tbd) = self.tbd {
            config.tbd = tbd;
        }
        if let Commands::Watch { interval: Some(interval) } = &self.command {
            config.purge_interval = Some(*interval);
        }
        config
    }
}
