//! The transactional outbox.
//!
//! [`publish_event`] is the only way rows enter `outbox_events`, and it only
//! accepts an open transaction: an event can never be committed without the
//! state change it describes, nor the other way round.

use chrono::Utc;
use rusqlite::{OptionalExtension as _, Transaction, params};

use quill_core::{
  event::{CommentEvent, OutboxEvent},
  notification::NewNotification,
  store::OutboxStore,
};

use crate::{
  Error, Result, SqliteStore,
  encode::{OUTBOX_COLUMNS, RawOutboxEvent, encode_dt},
};

/// An event about to be appended to the outbox.
#[derive(Debug, Clone)]
pub struct PublishEvent<'a> {
  pub aggregate_type: &'a str,
  pub aggregate_id:   &'a str,
  pub event:          &'a CommentEvent,
}

/// Append an event inside the caller's transaction. Returns the event id.
pub fn publish_event(tx: &Transaction<'_>, event: PublishEvent<'_>) -> Result<i64> {
  let payload = event.event.to_payload()?.to_string();
  tx.execute(
    "INSERT INTO outbox_events (aggregate_type, aggregate_id, event_type, payload, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    params![
      event.aggregate_type,
      event.aggregate_id,
      event.event.event_type(),
      payload,
      encode_dt(Utc::now()),
    ],
  )?;
  let id = tx.last_insert_rowid();
  tracing::trace!(event_id = id, event_type = event.event.event_type(), "outbox event published");
  Ok(id)
}

pub(crate) fn insert_notifications(
  tx: &Transaction<'_>,
  notifications: &[NewNotification],
) -> Result<usize> {
  let mut stmt = tx.prepare_cached(
    "INSERT INTO notifications (
        uid, notification_type, chain_id, recipient_address, author_address,
        app_signer, parent_id, entity_id, created_at_us, updated_at_us
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
     ON CONFLICT(uid) DO NOTHING",
  )?;
  let mut inserted = 0;
  for n in notifications {
    inserted += stmt.execute(params![
      n.uid,
      n.notification_type.to_string(),
      n.chain_id as i64,
      n.recipient_address,
      n.author_address,
      n.app_signer,
      n.parent_id,
      n.entity_id,
      n.created_at.timestamp_micros(),
    ])?;
  }
  Ok(inserted)
}

impl OutboxStore for SqliteStore {
  async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
    let raws = self
      .read(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {OUTBOX_COLUMNS} FROM outbox_events
           WHERE dispatched_at IS NULL AND failed_at IS NULL
           ORDER BY event_id
           LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(params![limit as i64], RawOutboxEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutboxEvent::into_event).collect()
  }

  async fn complete_event(
    &self,
    event_id: i64,
    notifications: Vec<NewNotification>,
  ) -> Result<usize> {
    self
      .write(move |tx| {
        let exists = tx
          .query_row(
            "SELECT 1 FROM outbox_events WHERE event_id = ?1",
            params![event_id],
            |_| Ok(()),
          )
          .optional()?;
        if exists.is_none() {
          return Err(Error::EventNotFound(event_id));
        }

        let inserted = insert_notifications(tx, &notifications)?;
        tx.execute(
          "UPDATE outbox_events SET dispatched_at = ?2
           WHERE event_id = ?1 AND dispatched_at IS NULL",
          params![event_id, encode_dt(Utc::now())],
        )?;
        Ok(inserted)
      })
      .await
  }

  async fn record_dispatch_failure(
    &self,
    event_id: i64,
    error: String,
    max_attempts: u32,
  ) -> Result<bool> {
    self
      .write(move |tx| {
        let flagged: Option<bool> = tx
          .query_row(
            "UPDATE outbox_events
             SET attempts   = attempts + 1,
                 last_error = ?2,
                 failed_at  = CASE WHEN attempts + 1 >= ?3 THEN ?4 ELSE NULL END
             WHERE event_id = ?1 AND dispatched_at IS NULL
             RETURNING failed_at IS NOT NULL",
            params![event_id, error, max_attempts as i64, encode_dt(Utc::now())],
            |r| r.get(0),
          )
          .optional()?;
        flagged.ok_or(Error::EventNotFound(event_id))
      })
      .await
  }
}
