//! Notifications and the query/page types of both listing paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::cursor::{FlatCursor, GroupCursor, PageRequest};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationType {
  Reply,
  Mention,
  Reaction,
  Quote,
}

/// Deterministic dedup key: `<type>:<chain>:<parent>:<entity or recipient>`.
///
/// Re-deriving a notification from the same outbox event always yields the
/// same uid, which is what makes at-least-once dispatch idempotent.
pub fn notification_uid(
  notification_type: NotificationType,
  chain_id: u64,
  parent_id: &str,
  discriminator: &str,
) -> String {
  format!("{notification_type}:{chain_id}:{parent_id}:{discriminator}")
}

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub id:                i64,
  pub uid:               String,
  #[serde(rename = "type")]
  pub notification_type: NotificationType,
  pub chain_id:          u64,
  pub recipient_address: String,
  pub author_address:    String,
  pub app_signer:        String,
  /// The comment the notification is grouped under.
  pub parent_id:         String,
  /// The comment that caused the notification.
  pub entity_id:         String,
  pub created_at:        DateTime<Utc>,
  pub updated_at:        DateTime<Utc>,
  pub seen_at:           Option<DateTime<Utc>>,
}

impl Notification {
  pub fn is_seen(&self) -> bool { self.seen_at.is_some() }
}

/// Input to [`NotificationStore`](crate::store::NotificationStore) upserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
  pub uid:               String,
  pub notification_type: NotificationType,
  pub chain_id:          u64,
  pub recipient_address: String,
  pub author_address:    String,
  pub app_signer:        String,
  pub parent_id:         String,
  pub entity_id:         String,
  pub created_at:        DateTime<Utc>,
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// Filters shared by the flat and grouped listings.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
  /// Lowercase recipient address.
  pub recipient: String,
  /// App-signer allow-list; empty means every app.
  pub apps:      Vec<String>,
  /// Restrict to these types; empty means every type.
  pub types:     Vec<NotificationType>,
  pub seen:      Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NotificationQuery {
  pub filter: NotificationFilter,
  pub page:   PageRequest<FlatCursor>,
  pub limit:  usize,
}

#[derive(Debug, Clone)]
pub struct GroupedNotificationQuery {
  pub filter:      NotificationFilter,
  pub page:        PageRequest<GroupCursor>,
  pub limit:       usize,
  /// Members returned per group.
  pub group_limit: usize,
}

// ─── Pages ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo<C> {
  /// Older items exist beyond the end of this page.
  pub has_next_page:     bool,
  /// Newer items exist before the start of this page.
  pub has_previous_page: bool,
  pub start_cursor:      Option<C>,
  pub end_cursor:        Option<C>,
}

impl<C> PageInfo<C> {
  pub fn empty() -> Self {
    Self {
      has_next_page:     false,
      has_previous_page: false,
      start_cursor:      None,
      end_cursor:        None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct NotificationPage {
  /// Newest first.
  pub notifications: Vec<Notification>,
  pub page_info:     PageInfo<FlatCursor>,
  /// Unseen notifications matching the filter, independent of the page.
  pub unseen_count:  u64,
}

/// Identity of a notification group for a fixed recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
  #[serde(rename = "type")]
  pub notification_type: NotificationType,
  pub parent_id:         String,
  pub app_signer:        String,
}

#[derive(Debug, Clone)]
pub struct NotificationGroup {
  pub key:           GroupKey,
  /// Position of the group's head row.
  pub cursor:        GroupCursor,
  pub updated_at:    DateTime<Utc>,
  pub unseen_count:  u64,
  /// Most recent members first; the head is always `notifications[0]`.
  pub notifications: Vec<Notification>,
  /// More members exist beyond `notifications`.
  pub has_next_page: bool,
}

#[derive(Debug, Clone)]
pub struct GroupedNotificationPage {
  pub groups:       Vec<NotificationGroup>,
  pub page_info:    PageInfo<GroupCursor>,
  pub unseen_count: u64,
}

#[cfg(test)]
mod tests {
  use std::str::FromStr as _;

  use super::*;

  #[test]
  fn uid_layout() {
    assert_eq!(
      notification_uid(NotificationType::Reply, 8453, "0xBB", "0xAA"),
      "reply:8453:0xBB:0xAA"
    );
  }

  #[test]
  fn type_parses_from_lowercase() {
    assert_eq!(NotificationType::from_str("quote").unwrap(), NotificationType::Quote);
    assert!(NotificationType::from_str("Quote").is_err());
  }
}
