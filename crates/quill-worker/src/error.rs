//! Error types for `quill-worker`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Core(#[from] quill_core::Error),

  #[error("moderation webhook request failed: {0}")]
  ModerationRequest(#[from] reqwest::Error),

  #[error("moderation webhook returned HTTP {0}")]
  ModerationStatus(u16),

  #[error("cannot sign moderation request: {0}")]
  Signing(#[from] quill_core::webhook::WebhookError),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self { Self::Store(Box::new(e)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
