//! SQLite backend for the Quill notification pipeline.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The outbox lives in the same database
//! as the comments it documents, which is what lets every write publish its
//! event atomically.

mod comments;
mod encode;
mod notifications;
mod references;
mod schema;
mod store;

pub mod error;
pub mod outbox;

pub use error::{Error, Result};
pub use store::SqliteStore;
