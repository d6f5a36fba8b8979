//! [`SqliteStore`]: the SQLite implementation of the Quill store traits.
//!
//! The trait implementations live next to the tables they own
//! (`comments.rs`, `outbox.rs`, `notifications.rs`, `references.rs`); this
//! module holds the connection and the transaction helpers they share.

use std::path::Path;

use rusqlite::TransactionBehavior;

use quill_core::store::Backend;

use crate::{Error, Result, schema::SCHEMA};

/// A Quill store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection handle is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl Backend for SqliteStore {
  type Error = Error;
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("sqlite schema initialised");
    Ok(())
  }

  /// Run `f` inside a `DEFERRED` transaction.
  ///
  /// Every statement `f` runs sees the same snapshot, so a listing's rows,
  /// sentinels and counts agree even while other processes write. The
  /// transaction is rolled back when `f` returns.
  pub(crate) async fn read<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        Ok(f(&tx))
      })
      .await?
  }

  /// Run `f` inside an `IMMEDIATE` transaction.
  ///
  /// The write lock is taken when the transaction begins, so rows read inside
  /// `f` cannot change before it commits. The transaction commits only when
  /// `f` returns `Ok`; on `Err` it is rolled back and nothing `f` wrote,
  /// outbox rows included, becomes visible.
  pub async fn write<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          Err(e) => Ok(Err(e)),
        }
      })
      .await?
  }
}
