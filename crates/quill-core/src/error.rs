//! Error types for `quill-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid cursor: {0}")]
  InvalidCursor(String),

  #[error("`before` and `after` cursors are mutually exclusive")]
  ConflictingCursors,

  #[error("unknown notification type: {0:?}")]
  UnknownNotificationType(String),

  #[error("unknown moderation label: {0:?}")]
  UnknownModerationLabel(String),

  #[error("moderation score for {label} out of range: {score}")]
  ScoreOutOfRange { label: String, score: f64 },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
