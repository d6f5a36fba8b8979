//! Error type for `quill-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] quill_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored discriminant that no longer maps onto a Rust enum.
  #[error("cannot decode column {column}: {value:?}")]
  Decode { column: &'static str, value: String },

  #[error("comment not found: {0}")]
  CommentNotFound(String),

  #[error("comment already exists: {0}")]
  CommentExists(String),

  #[error("comment {0} is deleted")]
  CommentDeleted(String),

  #[error("outbox event not found: {0}")]
  EventNotFound(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
