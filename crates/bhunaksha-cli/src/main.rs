// Copyright 2026 Bhunaksha Contributors
// SPDX-License-Identifier: Apache-2.0

//! bhunaksha: command line front end for the plot geometry engine.
//!
//! Results go to stdout as JSON; logs go to stderr.

use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use bhunaksha::{
    resolve_cache_path, sort_plot_numbers, BoundingBox, CancellationToken, Category,
    CollectOptions, EngineConfig, LocationCode, PlotEngine,
};

/// Padding applied around a village extent when framing a map.
const BBOX_PADDING: f64 = 0.1;

#[derive(Parser)]
#[command(
    name = "bhunaksha",
    about = "Fetch and cache plot boundaries from the Mahabhunakasha map service",
    version
)]
struct Cli {
    /// Path to the plot cache file.
    #[arg(short, long, global = true)]
    cache: Option<String>,

    /// Override the map service URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Land category: R (rural) or U (urban).
    #[arg(long, global = true, default_value = "R")]
    category: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// A village addressed by its hierarchy codes.
#[derive(Args)]
struct VillageArgs {
    /// District code, e.g. 25.
    district: String,
    /// Taluka code within the district.
    taluka: String,
    /// Village code within the taluka.
    village: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List districts.
    Districts,

    /// List talukas of a district.
    Talukas {
        district: String,
    },

    /// List villages of a taluka.
    Villages {
        district: String,
        taluka: String,
    },

    /// List plot numbers of a village.
    Plots {
        #[command(flatten)]
        village: VillageArgs,

        /// Sort numerically instead of server order.
        #[arg(long)]
        sorted: bool,
    },

    /// Fetch one plot's geometry and ownership details.
    Plot {
        #[command(flatten)]
        village: VillageArgs,

        /// Plot (survey) number.
        plot_no: String,
    },

    /// Fetch every plot boundary of a village and save the cache.
    Boundaries {
        #[command(flatten)]
        village: VillageArgs,

        /// Fetch at most this many plots.
        #[arg(long)]
        max_plots: Option<usize>,

        /// Concurrent fetches.
        #[arg(long)]
        workers: Option<usize>,

        /// Stop submitting new fetches after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Padded bounding box of a village, from cached plots when available.
    Bbox {
        #[command(flatten)]
        village: VillageArgs,
    },

    /// Inspect the plot cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   bhunaksha completions bash > ~/.local/share/bash-completion/completions/bhunaksha
    ///   bhunaksha completions zsh > ~/.zfunc/_bhunaksha
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Print cache location and size.
    Stats,
}

impl VillageArgs {
    fn location(&self, category: Category) -> LocationCode {
        LocationCode::new(category, &self.district, &self.taluka, &self.village)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "bhunaksha", &mut std::io::stdout());
        return Ok(());
    }

    let category = Category::from_code(&cli.category)?;
    let mut config = EngineConfig::from_env();
    if let Some(url) = cli.base_url.as_deref() {
        config = config.with_base_url(url);
    }
    if cli.cache.is_some() {
        config = config.with_cache_path(resolve_cache_path(cli.cache.as_deref()));
    }
    let engine = PlotEngine::new(config)?;

    match cli.command {
        Commands::Districts => {
            let districts = engine.fetch_districts(category).await;
            println!("{}", serde_json::to_string_pretty(&districts)?);
        }

        Commands::Talukas { district } => {
            let talukas = engine.fetch_talukas(&district, category).await;
            println!("{}", serde_json::to_string_pretty(&talukas)?);
        }

        Commands::Villages { district, taluka } => {
            let villages = engine.fetch_villages(&district, &taluka, category).await;
            println!("{}", serde_json::to_string_pretty(&villages)?);
        }

        Commands::Plots { village, sorted } => {
            let mut plots = engine
                .fetch_plot_list(&village.district, &village.taluka, &village.village, category)
                .await;
            if sorted {
                sort_plot_numbers(&mut plots);
            }
            println!("{}", serde_json::to_string_pretty(&plots)?);
        }

        Commands::Plot { village, plot_no } => {
            let location = village.location(category);
            let outcome = engine
                .lookup_plot(&location, &plot_no, &CancellationToken::new())
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if let Some(saved) = engine.flush_cache().await? {
                tracing::debug!("Cache holds {saved} plots");
            }
            if !outcome.is_found() {
                anyhow::bail!("Plot {plot_no} not available in village {location}");
            }
        }

        Commands::Boundaries {
            village,
            max_plots,
            workers,
            deadline_secs,
        } => {
            let location = village.location(category);
            let mut options = CollectOptions::from_config(engine.config());
            if let Some(n) = max_plots {
                options.max_plots = n;
            }
            if let Some(n) = workers {
                options.max_workers = n;
            }
            if let Some(secs) = deadline_secs {
                options.deadline = Some(Duration::from_secs(secs));
            }

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, finishing in-flight plots");
                    on_interrupt.cancel();
                }
            });

            let report = engine.collect_village(&location, options, &cancel).await;
            let saved = engine.save_cache().await?;
            tracing::info!("Cache holds {saved} plots");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Bbox { village } => {
            let location = village.location(category);
            let giscode = location.giscode();
            let mut records = engine.cache().records_for(&giscode);
            if records.is_empty() {
                records = engine
                    .fetch_village_boundaries(&location, None, None)
                    .await
                    .records;
            }

            let Some(extent) = BoundingBox::of_records(&records) else {
                anyhow::bail!("No usable plot geometry for village {giscode}");
            };
            let padded = extent.padded(BBOX_PADDING);
            let info = serde_json::json!({
                "giscode": giscode,
                "plots": records.len(),
                "extent": extent,
                "bbox": padded,
                "bbox_param": padded.to_bbox_param(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Cache {
            action: CacheCommands::Stats,
        } => {
            let cache = engine.cache();
            let file_bytes = std::fs::metadata(cache.path()).map(|m| m.len()).ok();
            let info = serde_json::json!({
                "path": cache.path().display().to_string(),
                "entries": cache.len(),
                "file_bytes": file_bytes,
                "dirty": cache.is_dirty(),
                "auto_persist": cache.auto_persist(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        // handled before the engine is built
        Commands::Completions { .. } => {}
    }

    Ok(())
}
