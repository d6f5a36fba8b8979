//! Outbox events: domain events written in the same transaction as the
//! mutation they describe.
//!
//! The event type is stored in its own column and the payload as JSON, the
//! same split the consumers see. Consumers must ignore event types they do
//! not know; [`CommentEvent::from_parts`] returns `Ok(None)` for those.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  moderation::ModerationStatus,
  reference::ResolutionStatus,
};

/// Aggregate type recorded for every comment event.
pub const AGGREGATE_COMMENT: &str = "comment";

// ─── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAdded {
  pub id:        String,
  pub parent_id: Option<String>,
  pub author:    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRevised {
  pub id:       String,
  pub revision: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentReferencesUpdated {
  pub id:       String,
  pub revision: u32,
  pub status:   ResolutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentIdOnly {
  pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationStatusUpdated {
  pub id:     String,
  pub status: ModerationStatus,
}

// ─── CommentEvent ────────────────────────────────────────────────────────────

/// Every event the comment aggregate publishes. The variant name is the
/// `eventType` stored next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum CommentEvent {
  CommentAdded(CommentAdded),
  CommentDeleted(CommentIdOnly),
  CommentEdited(CommentRevised),
  CommentReferencesUpdated(CommentReferencesUpdated),
  CommentReactionsUpdated(CommentIdOnly),
  CommentModerationStatusUpdated(ModerationStatusUpdated),
}

const KNOWN_EVENT_TYPES: &[&str] = &[
  "CommentAdded",
  "CommentDeleted",
  "CommentEdited",
  "CommentReferencesUpdated",
  "CommentReactionsUpdated",
  "CommentModerationStatusUpdated",
];

impl CommentEvent {
  /// The discriminant stored in the `event_type` column. Must match the
  /// variant names above.
  pub fn event_type(&self) -> &'static str {
    match self {
      Self::CommentAdded(_) => "CommentAdded",
      Self::CommentDeleted(_) => "CommentDeleted",
      Self::CommentEdited(_) => "CommentEdited",
      Self::CommentReferencesUpdated(_) => "CommentReferencesUpdated",
      Self::CommentReactionsUpdated(_) => "CommentReactionsUpdated",
      Self::CommentModerationStatusUpdated(_) => "CommentModerationStatusUpdated",
    }
  }

  /// The comment this event is about.
  pub fn comment_id(&self) -> &str {
    match self {
      Self::CommentAdded(p) => &p.id,
      Self::CommentDeleted(p) | Self::CommentReactionsUpdated(p) => &p.id,
      Self::CommentEdited(p) => &p.id,
      Self::CommentReferencesUpdated(p) => &p.id,
      Self::CommentModerationStatusUpdated(p) => &p.id,
    }
  }

  /// Serialise the inner payload (without the type tag) for the `payload`
  /// column.
  pub fn to_payload(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("payload").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Rebuild an event from its stored parts. Unknown event types yield
  /// `Ok(None)`; a known type with a malformed payload is an error.
  pub fn from_parts(event_type: &str, payload: serde_json::Value) -> Result<Option<Self>> {
    if !KNOWN_EVENT_TYPES.contains(&event_type) {
      return Ok(None);
    }
    let wrapped = serde_json::json!({ "eventType": event_type, "payload": payload });
    Ok(Some(serde_json::from_value(wrapped)?))
  }
}

// ─── OutboxEvent ─────────────────────────────────────────────────────────────

/// A row of the outbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
  pub id:             i64,
  pub aggregate_type: String,
  pub aggregate_id:   String,
  pub event_type:     String,
  pub payload:        serde_json::Value,
  pub created_at:     DateTime<Utc>,
  pub dispatched_at:  Option<DateTime<Utc>>,
  /// Failed dispatch attempts so far.
  pub attempts:       u32,
  pub last_error:     Option<String>,
  /// Set once `attempts` reached the configured maximum; the row is then
  /// left for manual inspection.
  pub failed_at:      Option<DateTime<Utc>>,
}

impl OutboxEvent {
  pub fn decode(&self) -> Result<Option<CommentEvent>> {
    CommentEvent::from_parts(&self.event_type, self.payload.clone())
  }
}
