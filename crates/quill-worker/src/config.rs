//! Worker configuration, deserialised from `worker.toml` and `QUILL_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use quill_resolver::ResolverSettings;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  pub store_path: PathBuf,
  pub fanout:     FanOutSettings,
  pub moderation: ModerationSettings,
  pub refresher:  RefresherSettings,
  pub resolvers:  ResolverSettings,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("quill.db"),
      fanout:     FanOutSettings::default(),
      moderation: ModerationSettings::default(),
      refresher:  RefresherSettings::default(),
      resolvers:  ResolverSettings::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FanOutSettings {
  pub poll_interval_ms:  u64,
  pub batch_size:        usize,
  /// Failed attempts after which an event is flagged and no longer selected.
  pub max_attempts:      u32,
  /// How many ancestors a reply notifies.
  pub reply_depth_limit: usize,
}

impl Default for FanOutSettings {
  fn default() -> Self {
    Self {
      poll_interval_ms:  1_000,
      batch_size:        100,
      max_attempts:      5,
      reply_depth_limit: 5,
    }
  }
}

impl FanOutSettings {
  pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
}

/// The moderation trigger is disabled unless `webhook_url` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationSettings {
  pub webhook_url:    Option<String>,
  pub webhook_secret: String,
  pub timeout_ms:     u64,
}

impl Default for ModerationSettings {
  fn default() -> Self {
    Self { webhook_url: None, webhook_secret: String::new(), timeout_ms: 10_000 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefresherSettings {
  pub max_age_days: i64,
  pub batch_size:   usize,
}

impl Default for RefresherSettings {
  fn default() -> Self { Self { max_age_days: 7, batch_size: 100 } }
}
