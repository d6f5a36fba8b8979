//! [`CommentStore`] for [`SqliteStore`]. Every mutation publishes its outbox
//! event inside the same `IMMEDIATE` transaction.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, Transaction, params};

use quill_core::{
  comment::{Comment, NewComment},
  event::{
    AGGREGATE_COMMENT, CommentAdded, CommentEvent, CommentIdOnly, CommentRevised,
    ModerationStatusUpdated,
  },
  moderation::ModerationStatus,
  store::{CommentEdit, CommentStore},
};

use crate::{
  Error, Result, SqliteStore,
  encode::{COMMENT_COLUMNS, RawComment, encode_dt, encode_references},
  outbox::{PublishEvent, publish_event},
  references::upsert_result,
};

/// Upper bound on parent-chain walks, so a corrupted cycle cannot recurse
/// forever.
const MAX_THREAD_DEPTH: i64 = 1024;

pub(crate) fn load_comment(conn: &Connection, id: &str) -> Result<Option<Comment>> {
  conn
    .query_row(
      &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE comment_id = ?1"),
      params![id],
      RawComment::from_row,
    )
    .optional()?
    .map(RawComment::into_comment)
    .transpose()
}

fn require_comment(conn: &Connection, id: &str) -> Result<Comment> {
  load_comment(conn, id)?.ok_or_else(|| Error::CommentNotFound(id.to_owned()))
}

fn publish(tx: &Transaction<'_>, event: CommentEvent) -> Result<i64> {
  publish_event(tx, PublishEvent {
    aggregate_type: AGGREGATE_COMMENT,
    aggregate_id:   event.comment_id(),
    event:          &event,
  })
}

impl CommentStore for SqliteStore {
  async fn insert_comment(&self, input: NewComment) -> Result<Comment> {
    self
      .write(move |tx| {
        if load_comment(tx, &input.id)?.is_some() {
          return Err(Error::CommentExists(input.id));
        }

        let created_at = encode_dt(input.created_at);
        let classification = input
          .moderation_classification
          .as_ref()
          .map(serde_json::to_string)
          .transpose()?;
        tx.execute(
          "INSERT INTO comments (
              comment_id, chain_id, author, app, parent_id, comment_type, content,
              revision, references_json, references_status, moderation_status,
              moderation_classification, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?11, ?12, ?12)",
          params![
            input.id,
            input.chain_id as i64,
            input.author,
            input.app,
            input.parent_id,
            input.comment_type.to_string(),
            input.content,
            encode_references(&input.references)?,
            input.references_status.map(|s| s.to_string()),
            input.moderation_status.to_string(),
            classification,
            created_at,
          ],
        )?;

        if let Some(status) = input.references_status {
          upsert_result(tx, &input.id, 0, &input.references, status, Utc::now())?;
        }

        publish(tx, CommentEvent::CommentAdded(CommentAdded {
          id:        input.id.clone(),
          parent_id: input.parent_id.clone(),
          author:    input.author.clone(),
        }))?;

        require_comment(tx, &input.id)
      })
      .await
  }

  async fn edit_comment(&self, edit: CommentEdit) -> Result<Comment> {
    self
      .write(move |tx| {
        let current = require_comment(tx, &edit.id)?;
        if current.is_deleted() {
          return Err(Error::CommentDeleted(edit.id));
        }

        let revision = current.revision + 1;
        let now = Utc::now();
        let (references, status) = match &edit.resolution {
          Some(r) => (r.references.as_slice(), Some(r.status)),
          None => (&[][..], None),
        };
        tx.execute(
          "UPDATE comments
           SET content = ?2, revision = ?3, references_json = ?4,
               references_status = ?5, updated_at = ?6
           WHERE comment_id = ?1",
          params![
            edit.id,
            edit.content,
            revision as i64,
            encode_references(references)?,
            status.map(|s| s.to_string()),
            encode_dt(now),
          ],
        )?;

        if let Some(status) = status {
          upsert_result(tx, &edit.id, revision, references, status, now)?;
        }

        publish(tx, CommentEvent::CommentEdited(CommentRevised {
          id: edit.id.clone(),
          revision,
        }))?;

        require_comment(tx, &edit.id)
      })
      .await
  }

  async fn delete_comment(&self, id: String) -> Result<Comment> {
    self
      .write(move |tx| {
        let current = require_comment(tx, &id)?;
        if current.is_deleted() {
          return Ok(current);
        }

        let now = encode_dt(Utc::now());
        tx.execute(
          "UPDATE comments SET deleted_at = ?2, updated_at = ?2 WHERE comment_id = ?1",
          params![id, now],
        )?;
        publish(tx, CommentEvent::CommentDeleted(CommentIdOnly { id: id.clone() }))?;

        require_comment(tx, &id)
      })
      .await
  }

  async fn set_moderation_status(&self, id: String, status: ModerationStatus) -> Result<Comment> {
    self
      .write(move |tx| {
        require_comment(tx, &id)?;
        tx.execute(
          "UPDATE comments SET moderation_status = ?2, updated_at = ?3 WHERE comment_id = ?1",
          params![id, status.to_string(), encode_dt(Utc::now())],
        )?;
        publish(
          tx,
          CommentEvent::CommentModerationStatusUpdated(ModerationStatusUpdated {
            id: id.clone(),
            status,
          }),
        )?;

        require_comment(tx, &id)
      })
      .await
  }

  async fn record_reactions_updated(&self, id: String) -> Result<()> {
    self
      .write(move |tx| {
        require_comment(tx, &id)?;
        publish(tx, CommentEvent::CommentReactionsUpdated(CommentIdOnly { id }))?;
        Ok(())
      })
      .await
  }

  async fn get_comment(&self, id: String) -> Result<Option<Comment>> {
    self.read(move |conn| load_comment(conn, &id)).await
  }

  async fn ancestors(&self, id: String, max_depth: usize) -> Result<Vec<Comment>> {
    let max_depth = (max_depth as i64).min(MAX_THREAD_DEPTH);
    let raws = self
      .read(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "WITH RECURSIVE chain(ancestor_id, depth) AS (
              SELECT parent_id, 1 FROM comments
              WHERE comment_id = ?1 AND parent_id IS NOT NULL
            UNION ALL
              SELECT c.parent_id, chain.depth + 1
              FROM chain JOIN comments c ON c.comment_id = chain.ancestor_id
              WHERE c.parent_id IS NOT NULL AND chain.depth < ?2
           )
           SELECT {COMMENT_COLUMNS} FROM chain
           JOIN comments ON comments.comment_id = chain.ancestor_id
           ORDER BY chain.depth"
        ))?;
        let rows = stmt
          .query_map(params![id, max_depth], RawComment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawComment::into_comment).collect()
  }

  async fn resolve_root_id(&self, parent_id: String) -> Result<Option<String>> {
    self
      .read(move |conn| {
        let root = conn
          .query_row(
            "WITH RECURSIVE up(id, parent_id, depth) AS (
                SELECT comment_id, parent_id, 0 FROM comments WHERE comment_id = ?1
              UNION ALL
                SELECT c.comment_id, c.parent_id, up.depth + 1
                FROM up JOIN comments c ON c.comment_id = up.parent_id
                WHERE up.depth < ?2
             )
             SELECT id FROM up ORDER BY depth DESC LIMIT 1",
            params![parent_id, MAX_THREAD_DEPTH],
            |r| r.get(0),
          )
          .optional()?;
        Ok(root)
      })
      .await
  }
}
