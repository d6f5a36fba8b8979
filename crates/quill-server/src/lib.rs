//! HTTP server assembly for Quill.
//!
//! Nests the JSON API under `/api` and adds request tracing and a liveness
//! endpoint. The binary in `main.rs` only loads configuration and wires the
//! store and resolvers into [`AppState`].

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use axum::{Router, routing::get};
use quill_api::{AppState, WebhookConfig};
use quill_core::{
  store::{CommentStore, NotificationStore},
  webhook::DEFAULT_MAX_AGE,
};
use quill_resolver::{ResolverSettings, identity::IdentityLookup};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `QUILL_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                 String,
  pub port:                 u16,
  pub store_path:           PathBuf,
  /// Shared secret of the moderation webhook. Required.
  pub webhook_secret:       String,
  pub webhook_max_age_secs: u64,
  pub resolvers:            ResolverSettings,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                 "127.0.0.1".into(),
      port:                 8080,
      store_path:           PathBuf::from("quill.db"),
      webhook_secret:       String::new(),
      webhook_max_age_secs: DEFAULT_MAX_AGE.as_secs(),
      resolvers:            ResolverSettings::default(),
    }
  }
}

impl ServerConfig {
  pub fn webhook(&self) -> WebhookConfig {
    WebhookConfig {
      secret:  self.webhook_secret.clone(),
      max_age: Duration::from_secs(self.webhook_max_age_secs),
    }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full application router.
pub fn router<S, I>(state: AppState<S, I>) -> Router
where
  S: CommentStore + NotificationStore + 'static,
  I: IdentityLookup + 'static,
{
  Router::new()
    .route("/healthz", get(|| async { "ok" }))
    .nest("/api", quill_api::api_router(state))
    .layer(TraceLayer::new_for_http())
}
