//! [`ReferenceResultStore`] for [`SqliteStore`].

use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension as _, Transaction, params};

use quill_core::{
  event::{AGGREGATE_COMMENT, CommentEvent, CommentReferencesUpdated},
  reference::{
    CommentReferenceResolutionResult, Reference, ReferenceResolution, ResolutionStatus,
  },
  store::{ReferenceResultStore, ResolutionWrite},
};

use crate::{
  Result, SqliteStore,
  comments::load_comment,
  encode::{RESULT_COLUMNS, RawResolutionResult, encode_dt, encode_references},
  outbox::{PublishEvent, publish_event},
};

/// Insert or overwrite the result row for `comment_id`, unless the stored
/// row belongs to a newer revision. Returns `false` when the guard held.
///
/// `failing_since` records the first unsuccessful resolution of a revision.
/// Retries that fail again keep it; a success or a new revision resets it.
pub(crate) fn upsert_result(
  tx: &Transaction<'_>,
  comment_id: &str,
  revision: u32,
  references: &[Reference],
  status: ResolutionStatus,
  now: DateTime<Utc>,
) -> Result<bool> {
  let changed = tx.execute(
    "INSERT INTO comment_reference_results
        (comment_id, comment_revision, references_json, status, updated_at, failing_since)
     VALUES (?1, ?2, ?3, ?4, ?5, CASE WHEN ?4 = 'success' THEN NULL ELSE ?5 END)
     ON CONFLICT(comment_id) DO UPDATE SET
        comment_revision = excluded.comment_revision,
        references_json  = excluded.references_json,
        status           = excluded.status,
        updated_at       = excluded.updated_at,
        failing_since    = CASE
          WHEN excluded.status = 'success' THEN NULL
          WHEN comment_reference_results.comment_revision = excluded.comment_revision
           AND comment_reference_results.failing_since IS NOT NULL
            THEN comment_reference_results.failing_since
          ELSE excluded.failing_since
        END
     WHERE excluded.comment_revision >= comment_reference_results.comment_revision",
    params![
      comment_id,
      revision as i64,
      encode_references(references)?,
      status.to_string(),
      encode_dt(now),
    ],
  )?;
  Ok(changed > 0)
}

impl ReferenceResultStore for SqliteStore {
  async fn refresh_candidates(
    &self,
    max_age: Duration,
    limit: usize,
  ) -> Result<Vec<CommentReferenceResolutionResult>> {
    let since = encode_dt(Utc::now() - max_age);
    let raws = self
      .read(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {RESULT_COLUMNS} FROM comment_reference_results
           WHERE status IN ('failed', 'partial') AND failing_since >= ?1
           ORDER BY updated_at ASC, comment_id ASC
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(params![since, limit as i64], RawResolutionResult::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawResolutionResult::into_result).collect()
  }

  async fn store_resolution(
    &self,
    comment_id: String,
    revision: u32,
    resolution: ReferenceResolution,
  ) -> Result<ResolutionWrite> {
    self
      .write(move |tx| {
        // The IMMEDIATE transaction holds the write lock from here on, so
        // the revision checked below is the one the write lands against.
        let Some(comment) = load_comment(tx, &comment_id)? else {
          return Ok(ResolutionWrite::CommentMissing);
        };
        if comment.is_deleted() {
          return Ok(ResolutionWrite::CommentDeleted);
        }
        if comment.revision != revision {
          return Ok(ResolutionWrite::StaleRevision { current: comment.revision });
        }

        let now = Utc::now();
        let ReferenceResolution { references, status } = resolution;
        if !upsert_result(tx, &comment_id, revision, &references, status, now)? {
          return Ok(ResolutionWrite::StaleRevision { current: comment.revision });
        }

        tx.execute(
          "UPDATE comments
           SET references_json = ?2, references_status = ?3, updated_at = ?4
           WHERE comment_id = ?1",
          params![comment_id, encode_references(&references)?, status.to_string(), encode_dt(now)],
        )?;

        let event = CommentEvent::CommentReferencesUpdated(CommentReferencesUpdated {
          id: comment_id.clone(),
          revision,
          status,
        });
        publish_event(tx, PublishEvent {
          aggregate_type: AGGREGATE_COMMENT,
          aggregate_id:   &comment_id,
          event:          &event,
        })?;

        Ok(ResolutionWrite::Stored(CommentReferenceResolutionResult {
          comment_id,
          comment_revision: revision,
          references,
          status,
          // Round-trip through the stored precision.
          updated_at: DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now),
        }))
      })
      .await
  }

  async fn get_resolution(
    &self,
    comment_id: String,
  ) -> Result<Option<CommentReferenceResolutionResult>> {
    self
      .read(move |conn| {
        conn
          .query_row(
            &format!(
              "SELECT {RESULT_COLUMNS} FROM comment_reference_results WHERE comment_id = ?1"
            ),
            params![comment_id],
            RawResolutionResult::from_row,
          )
          .optional()?
          .map(RawResolutionResult::into_result)
          .transpose()
      })
      .await
  }
}
