//! quill-worker binary.
//!
//! ```text
//! quill-worker --config worker.toml fanout
//! quill-worker refresh-references --max-age-days 3 --batch-size 500 --dry-run
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use quill_core::report::{ErrorReporter, TracingReporter};
use quill_resolver::Resolvers;
use quill_store_sqlite::SqliteStore;
use quill_worker::{
  config::WorkerConfig,
  fanout::FanOutWorker,
  moderation::ModerationClient,
  refresher::{RefreshOptions, Refresher},
  shutdown::shutdown_signal,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Quill background workers")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "worker.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Drain the outbox into notifications until signalled.
  Fanout,

  /// Retry reference resolutions that failed or were partial.
  RefreshReferences {
    /// Only retry results that first failed within this many days.
    #[arg(long)]
    max_age_days: Option<i64>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// List candidates without resolving them.
    #[arg(long)]
    dry_run: bool,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("QUILL").separator("__"))
    .build()
    .context("failed to read config file")?;

  let worker_cfg: WorkerConfig = settings
    .try_deserialize()
    .context("failed to deserialise WorkerConfig")?;

  let store = SqliteStore::open(&worker_cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", worker_cfg.store_path))?;
  let store = Arc::new(store);
  let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);

  match cli.command {
    Command::Fanout => {
      let moderation = ModerationClient::from_settings(&worker_cfg.moderation)
        .context("failed to build moderation client")?;
      if moderation.is_none() {
        tracing::warn!("moderation.webhook_url not set; review requests disabled");
      }
      let shutdown = shutdown_signal().context("failed to install signal handlers")?;
      FanOutWorker::new(store, moderation, reporter, worker_cfg.fanout)
        .run(shutdown)
        .await;
    }

    Command::RefreshReferences { max_age_days, batch_size, dry_run } => {
      let resolvers = Resolvers::build(&worker_cfg.resolvers)
        .context("failed to build resolver clients")?;
      let options = RefreshOptions {
        max_age: chrono::Duration::days(
          max_age_days.unwrap_or(worker_cfg.refresher.max_age_days),
        ),
        batch_size: batch_size.unwrap_or(worker_cfg.refresher.batch_size),
        dry_run,
      };
      let report = Refresher::new(store, resolvers.references(), reporter)
        .run(&options)
        .await
        .context("refresh failed")?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }

  Ok(())
}
