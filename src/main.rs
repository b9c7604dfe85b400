//! File Storage Daemon
//!
//! Runs garbage collection for configured buckets and exposes the store's
//! operations for scripting and maintenance.
//!
//! ## Usage
//!
//! ```bash
//! # Collect unlinked files for every bucket until Ctrl+C
//! file-storage --config /etc/file-storage.toml run
//!
//! # One collection cycle now, collecting anything unlinked for an hour
//! file-storage --config /etc/file-storage.toml gc --bucket img --grace-secs 3600
//!
//! # Store files and link them to an object
//! file-storage --config /etc/file-storage.toml save --bucket img --object orders.42 a.jpg b.jpg
//!
//! # Inspect and change links
//! file-storage --config /etc/file-storage.toml files-of --bucket img orders.42
//! file-storage --config /etc/file-storage.toml unlink --bucket img orders.42 <hash>
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use file_storage::{Config, ImagePolicy, Registry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "file-storage")]
#[command(about = "Content-addressed file storage with linked-object garbage collection")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "FILE_STORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Catalog database path
    #[arg(long, env = "FILE_STORAGE_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run garbage collectors for every bucket until interrupted
    Run,

    /// Run one garbage collection cycle
    Gc {
        #[arg(short, long)]
        bucket: String,

        /// Minimum age of unlinked files to collect (defaults to the
        /// bucket's clean_after_secs)
        #[arg(long)]
        grace_secs: Option<u64>,
    },

    /// Store files, printing one hash per line
    Save {
        #[arg(short, long)]
        bucket: String,

        /// Object to link the files to
        #[arg(short, long, default_value = "")]
        object: String,

        /// Accept only images up to this many bytes
        #[arg(long)]
        max_image_size: Option<u64>,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Link files to an object
    Link {
        #[arg(short, long)]
        bucket: String,
        object: String,
        /// File hashes or download URLs
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Unlink files from an object, or every file with --all
    Unlink {
        #[arg(short, long)]
        bucket: String,
        object: String,
        #[arg(long, conflicts_with = "files")]
        all: bool,
        files: Vec<String>,
    },

    /// List the files linked to an object, oldest first
    FilesOf {
        #[arg(short, long)]
        bucket: String,
        object: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("file_storage=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(database) = args.database {
        config.database_path = database;
    }

    info!(
        database = %config.database_path.display(),
        buckets = config.buckets.len(),
        "Starting file-storage"
    );

    let registry = Registry::from_config(&config)?;

    match args.command {
        Command::Run => run(&registry, &config).await?,
        Command::Gc { bucket, grace_secs } => {
            let grace = match grace_secs {
                Some(secs) => secs,
                None => config
                    .bucket(&bucket)
                    .map(|b| b.clean_after_secs)
                    .unwrap_or_default(),
            };
            let bucket = registry.get(&bucket)?;
            let removed = tokio::task::spawn_blocking(move || {
                bucket.collect_garbage(Duration::from_secs(grace))
            })
            .await??;
            for hash in removed {
                println!("{}", hash);
            }
        }
        Command::Save {
            bucket,
            object,
            max_image_size,
            paths,
        } => {
            let bucket = registry.get(&bucket)?;
            let policy = max_image_size.map(ImagePolicy::new);
            let check = move |content_type: &str, size: u64| match policy {
                Some(policy) => policy.check(content_type, size),
                None => Ok(()),
            };
            let hashes = bucket.save_files(None, Some(&check), &object, &paths)?;
            for hash in hashes {
                println!("{}", hash);
            }
        }
        Command::Link {
            bucket,
            object,
            files,
        } => {
            let files = file_storage::file_hashes(&files)?;
            registry.get(&bucket)?.link(None, &object, &files)?;
        }
        Command::Unlink {
            bucket,
            object,
            all,
            files,
        } => {
            let bucket = registry.get(&bucket)?;
            if all {
                bucket.unlink_all_of(None, &object)?;
            } else {
                bucket.unlink(None, &object, &file_storage::file_hashes(&files)?)?;
            }
        }
        Command::FilesOf { bucket, object } => {
            for hash in registry.get(&bucket)?.files_of(None, &object)? {
                println!("{}", hash);
            }
        }
    }

    Ok(())
}

async fn run(registry: &Registry, config: &Config) -> anyhow::Result<()> {
    let collectors = registry.start_collectors(config);
    info!(collectors = collectors.len(), "Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for collector in collectors {
        collector.stop().await;
    }

    // Print stats before exit
    for name in registry.names() {
        if let Ok(stats) = registry.get(name)?.stats() {
            info!(
                bucket = %name,
                files = stats.files,
                links = stats.links,
                bytes = stats.total_bytes,
                "Final catalog stats"
            );
        }
    }
    Ok(())
}
