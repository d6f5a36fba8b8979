//! Encoding and decoding helpers between Rust domain types and the column
//! representations stored in SQLite.
//!
//! Text timestamps are RFC 3339 with fixed microsecond precision and a `Z`
//! suffix, so they sort lexicographically. Notification timestamps are
//! integer microseconds. Enums are stored as their lowercase `strum` names;
//! structured fields as compact JSON.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use quill_core::{
  comment::Comment,
  event::OutboxEvent,
  notification::Notification,
  reference::{CommentReferenceResolutionResult, Reference},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn decode_us(us: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_micros(us)
    .ok_or_else(|| Error::DateParse(format!("microseconds out of range: {us}")))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_enum<T: FromStr>(column: &'static str, value: String) -> Result<T> {
  T::from_str(&value).map_err(|_| Error::Decode { column, value })
}

// ─── References ──────────────────────────────────────────────────────────────

pub fn encode_references(refs: &[Reference]) -> Result<String> {
  Ok(serde_json::to_string(refs)?)
}

pub fn decode_references(s: &str) -> Result<Vec<Reference>> { Ok(serde_json::from_str(s)?) }

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// Column list matching [`RawComment::from_row`].
pub const COMMENT_COLUMNS: &str = "comment_id, chain_id, author, app, parent_id, comment_type, \
   content, revision, references_json, references_status, moderation_status, \
   moderation_classification, created_at, updated_at, deleted_at";

/// Raw values read directly from a `comments` row.
pub struct RawComment {
  pub comment_id:                String,
  pub chain_id:                  i64,
  pub author:                    String,
  pub app:                       String,
  pub parent_id:                 Option<String>,
  pub comment_type:              String,
  pub content:                   String,
  pub revision:                  i64,
  pub references_json:           String,
  pub references_status:         Option<String>,
  pub moderation_status:         String,
  pub moderation_classification: Option<String>,
  pub created_at:                String,
  pub updated_at:                String,
  pub deleted_at:                Option<String>,
}

impl RawComment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      comment_id:                row.get(0)?,
      chain_id:                  row.get(1)?,
      author:                    row.get(2)?,
      app:                       row.get(3)?,
      parent_id:                 row.get(4)?,
      comment_type:              row.get(5)?,
      content:                   row.get(6)?,
      revision:                  row.get(7)?,
      references_json:           row.get(8)?,
      references_status:         row.get(9)?,
      moderation_status:         row.get(10)?,
      moderation_classification: row.get(11)?,
      created_at:                row.get(12)?,
      updated_at:                row.get(13)?,
      deleted_at:                row.get(14)?,
    })
  }

  pub fn into_comment(self) -> Result<Comment> {
    Ok(Comment {
      id:                        self.comment_id,
      chain_id:                  self.chain_id as u64,
      author:                    self.author,
      app:                       self.app,
      parent_id:                 self.parent_id,
      comment_type:              decode_enum("comment_type", self.comment_type)?,
      content:                   self.content,
      revision:                  self.revision as u32,
      references:                decode_references(&self.references_json)?,
      references_status:         self
        .references_status
        .map(|s| decode_enum("references_status", s))
        .transpose()?,
      moderation_status:         decode_enum("moderation_status", self.moderation_status)?,
      moderation_classification: self
        .moderation_classification
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      created_at:                decode_dt(&self.created_at)?,
      updated_at:                decode_dt(&self.updated_at)?,
      deleted_at:                decode_opt_dt(self.deleted_at)?,
    })
  }
}

pub const OUTBOX_COLUMNS: &str = "event_id, aggregate_type, aggregate_id, event_type, payload, \
   created_at, dispatched_at, attempts, last_error, failed_at";

/// Raw values read directly from an `outbox_events` row.
pub struct RawOutboxEvent {
  pub event_id:       i64,
  pub aggregate_type: String,
  pub aggregate_id:   String,
  pub event_type:     String,
  pub payload:        String,
  pub created_at:     String,
  pub dispatched_at:  Option<String>,
  pub attempts:       i64,
  pub last_error:     Option<String>,
  pub failed_at:      Option<String>,
}

impl RawOutboxEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:       row.get(0)?,
      aggregate_type: row.get(1)?,
      aggregate_id:   row.get(2)?,
      event_type:     row.get(3)?,
      payload:        row.get(4)?,
      created_at:     row.get(5)?,
      dispatched_at:  row.get(6)?,
      attempts:       row.get(7)?,
      last_error:     row.get(8)?,
      failed_at:      row.get(9)?,
    })
  }

  pub fn into_event(self) -> Result<OutboxEvent> {
    Ok(OutboxEvent {
      id:             self.event_id,
      aggregate_type: self.aggregate_type,
      aggregate_id:   self.aggregate_id,
      event_type:     self.event_type,
      payload:        serde_json::from_str(&self.payload)?,
      created_at:     decode_dt(&self.created_at)?,
      dispatched_at:  decode_opt_dt(self.dispatched_at)?,
      attempts:       self.attempts as u32,
      last_error:     self.last_error,
      failed_at:      decode_opt_dt(self.failed_at)?,
    })
  }
}

/// Column list matching [`RawNotification::from_row`]; callers prefix it
/// with their table alias.
pub const NOTIFICATION_COLUMNS: [&str; 12] = [
  "notification_id",
  "uid",
  "notification_type",
  "chain_id",
  "recipient_address",
  "author_address",
  "app_signer",
  "parent_id",
  "entity_id",
  "created_at_us",
  "updated_at_us",
  "seen_at",
];

pub fn notification_columns(alias: &str) -> String {
  NOTIFICATION_COLUMNS
    .iter()
    .map(|c| format!("{alias}.{c}"))
    .collect::<Vec<_>>()
    .join(", ")
}

/// Raw values read directly from a `notifications` row.
pub struct RawNotification {
  pub notification_id:   i64,
  pub uid:               String,
  pub notification_type: String,
  pub chain_id:          i64,
  pub recipient_address: String,
  pub author_address:    String,
  pub app_signer:        String,
  pub parent_id:         String,
  pub entity_id:         String,
  pub created_at_us:     i64,
  pub updated_at_us:     i64,
  pub seen_at:           Option<String>,
}

impl RawNotification {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      notification_id:   row.get(0)?,
      uid:               row.get(1)?,
      notification_type: row.get(2)?,
      chain_id:          row.get(3)?,
      recipient_address: row.get(4)?,
      author_address:    row.get(5)?,
      app_signer:        row.get(6)?,
      parent_id:         row.get(7)?,
      entity_id:         row.get(8)?,
      created_at_us:     row.get(9)?,
      updated_at_us:     row.get(10)?,
      seen_at:           row.get(11)?,
    })
  }

  pub fn into_notification(self) -> Result<Notification> {
    Ok(Notification {
      id:                self.notification_id,
      uid:               self.uid,
      notification_type: decode_enum("notification_type", self.notification_type)?,
      chain_id:          self.chain_id as u64,
      recipient_address: self.recipient_address,
      author_address:    self.author_address,
      app_signer:        self.app_signer,
      parent_id:         self.parent_id,
      entity_id:         self.entity_id,
      created_at:        decode_us(self.created_at_us)?,
      updated_at:        decode_us(self.updated_at_us)?,
      seen_at:           decode_opt_dt(self.seen_at)?,
    })
  }
}

pub const RESULT_COLUMNS: &str =
  "comment_id, comment_revision, references_json, status, updated_at";

/// Raw values read directly from a `comment_reference_results` row.
pub struct RawResolutionResult {
  pub comment_id:       String,
  pub comment_revision: i64,
  pub references_json:  String,
  pub status:           String,
  pub updated_at:       String,
}

impl RawResolutionResult {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      comment_id:       row.get(0)?,
      comment_revision: row.get(1)?,
      references_json:  row.get(2)?,
      status:           row.get(3)?,
      updated_at:       row.get(4)?,
    })
  }

  pub fn into_result(self) -> Result<CommentReferenceResolutionResult> {
    Ok(CommentReferenceResolutionResult {
      comment_id:       self.comment_id,
      comment_revision: self.comment_revision as u32,
      references:       decode_references(&self.references_json)?,
      status:           decode_enum("status", self.status)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}
