//! Comments: the aggregate whose lifecycle drives every outbox event.
//!
//! Comments are written by the ingestion collaborator through
//! [`CommentStore`](crate::store::CommentStore). They are soft-deleted only;
//! notifications pointing at a deleted comment are filtered on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
  moderation::{ClassificationResult, ModerationStatus},
  reference::{Reference, ResolutionStatus},
};

/// Whether a comment is a regular comment or a reaction to its parent.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommentType {
  #[default]
  Comment,
  Reaction,
}

/// A comment as stored, with its latest reference resolution copied in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  pub id:                        String,
  pub chain_id:                  u64,
  /// Lowercase hex address of the author.
  pub author:                    String,
  /// Lowercase hex address of the app signer that relayed the comment.
  pub app:                       String,
  pub parent_id:                 Option<String>,
  pub comment_type:              CommentType,
  pub content:                   String,
  /// Bumped on every edit; reference results are guarded by it.
  pub revision:                  u32,
  pub references:                Vec<Reference>,
  pub references_status:         Option<ResolutionStatus>,
  pub moderation_status:         ModerationStatus,
  pub moderation_classification: Option<ClassificationResult>,
  pub created_at:                DateTime<Utc>,
  pub updated_at:                DateTime<Utc>,
  pub deleted_at:                Option<DateTime<Utc>>,
}

impl Comment {
  pub fn is_deleted(&self) -> bool { self.deleted_at.is_some() }
}

/// Input to [`CommentStore::insert_comment`](crate::store::CommentStore::insert_comment).
#[derive(Debug, Clone)]
pub struct NewComment {
  pub id:                        String,
  pub chain_id:                  u64,
  pub author:                    String,
  pub app:                       String,
  pub parent_id:                 Option<String>,
  pub comment_type:              CommentType,
  pub content:                   String,
  pub references:                Vec<Reference>,
  pub references_status:         Option<ResolutionStatus>,
  pub moderation_status:         ModerationStatus,
  pub moderation_classification: Option<ClassificationResult>,
  /// Block timestamp of the event that created the comment.
  pub created_at:                DateTime<Utc>,
}

impl NewComment {
  /// Convenience constructor with all optional fields set to their defaults.
  /// Addresses are normalised to lowercase.
  pub fn new(
    id: impl Into<String>,
    chain_id: u64,
    author: &str,
    app: &str,
    content: impl Into<String>,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      id: id.into(),
      chain_id,
      author: normalize_address(author),
      app: normalize_address(app),
      parent_id: None,
      comment_type: CommentType::Comment,
      content: content.into(),
      references: Vec::new(),
      references_status: None,
      moderation_status: ModerationStatus::default(),
      moderation_classification: None,
      created_at,
    }
  }

  pub fn reply_to(mut self, parent_id: impl Into<String>) -> Self {
    self.parent_id = Some(parent_id.into());
    self
  }

  pub fn reaction_to(mut self, parent_id: impl Into<String>) -> Self {
    self.parent_id = Some(parent_id.into());
    self.comment_type = CommentType::Reaction;
    self
  }
}

/// Canonical form for addresses stored and compared anywhere in Quill.
pub fn normalize_address(address: &str) -> String { address.trim().to_ascii_lowercase() }

/// `true` for a `0x`-prefixed, 20-byte hex string.
pub fn is_hex_address(s: &str) -> bool { is_hex_of_len(s, 40) }

/// `true` for a `0x`-prefixed, 32-byte hex string (the comment id format).
pub fn is_hex_comment_id(s: &str) -> bool { is_hex_of_len(s, 64) }

fn is_hex_of_len(s: &str, len: usize) -> bool {
  s.strip_prefix("0x")
    .is_some_and(|rest| rest.len() == len && rest.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hex_address_detection() {
    assert!(is_hex_address("0x00000000000000000000000000000000000000aB"));
    assert!(!is_hex_address("0x1"));
    assert!(!is_hex_address("00000000000000000000000000000000000000ab00"));
    assert!(!is_hex_address("0x00000000000000000000000000000000000000zz"));
  }

  #[test]
  fn new_comment_normalises_addresses() {
    let c = NewComment::new("0xAA", 8453, " 0xABC ", "0xDEF", "hi", Utc::now());
    assert_eq!(c.author, "0xabc");
    assert_eq!(c.app, "0xdef");
    assert_eq!(c.id, "0xAA");
  }
}
