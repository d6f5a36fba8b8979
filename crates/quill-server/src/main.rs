//! quill-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `QUILL_*` environment variables, opens the SQLite store, builds the
//! resolver caches and serves the notification API over HTTP.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use quill_api::AppState;
use quill_resolver::Resolvers;
use quill_server::{ServerConfig, expand_tilde};
use quill_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Quill notification API server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
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

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  if server_cfg.webhook_secret.is_empty() {
    anyhow::bail!("webhook_secret must be set (QUILL_WEBHOOK_SECRET)");
  }

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let resolvers =
    Resolvers::build(&server_cfg.resolvers).context("failed to build resolver clients")?;

  let state = AppState {
    store:    Arc::new(store),
    identity: Arc::new(resolvers.identity()),
    webhook:  Arc::new(server_cfg.webhook()),
  };

  let app = quill_server::router(state);
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
