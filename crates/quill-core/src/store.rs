//! Storage traits.
//!
//! Implemented by storage backends (e.g. `quill-store-sqlite`). The API and
//! the workers depend on these abstractions, not on a concrete backend.
//!
//! Every write on [`CommentStore`] publishes its outbox event in the same
//! transaction as the mutation. All methods return `Send` futures so the
//! traits can be used from multi-threaded runtimes (tokio with `axum`).

use std::future::Future;

use chrono::Duration;

use crate::{
  comment::{Comment, NewComment},
  event::OutboxEvent,
  moderation::ModerationStatus,
  notification::{
    GroupedNotificationPage, GroupedNotificationQuery, NewNotification, NotificationPage,
    NotificationQuery,
  },
  reference::{CommentReferenceResolutionResult, ReferenceResolution},
};

/// Shared error type for every store trait a backend implements.
pub trait Backend: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;
}

// ─── Comments ────────────────────────────────────────────────────────────────

/// An edit of an existing comment. References resolved at ingestion time are
/// carried along so the stored result tracks the new revision.
#[derive(Debug, Clone)]
pub struct CommentEdit {
  pub id:         String,
  pub content:    String,
  pub resolution: Option<ReferenceResolution>,
}

pub trait CommentStore: Backend {
  /// Persist a comment and publish `CommentAdded`.
  fn insert_comment(
    &self,
    input: NewComment,
  ) -> impl Future<Output = Result<Comment, Self::Error>> + Send + '_;

  /// Replace the content, bump the revision and publish `CommentEdited`.
  fn edit_comment(
    &self,
    edit: CommentEdit,
  ) -> impl Future<Output = Result<Comment, Self::Error>> + Send + '_;

  /// Soft-delete and publish `CommentDeleted`.
  fn delete_comment(
    &self,
    id: String,
  ) -> impl Future<Output = Result<Comment, Self::Error>> + Send + '_;

  /// Record a moderation decision and publish `CommentModerationStatusUpdated`.
  fn set_moderation_status(
    &self,
    id: String,
    status: ModerationStatus,
  ) -> impl Future<Output = Result<Comment, Self::Error>> + Send + '_;

  /// Publish `CommentReactionsUpdated` after reaction counters changed.
  fn record_reactions_updated(
    &self,
    id: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Returns `None` if not found. Deleted comments are returned.
  fn get_comment(
    &self,
    id: String,
  ) -> impl Future<Output = Result<Option<Comment>, Self::Error>> + Send + '_;

  /// Walk up the parent chain of `id`, nearest ancestor first, at most
  /// `max_depth` levels. The comment itself is not included.
  fn ancestors(
    &self,
    id: String,
    max_depth: usize,
  ) -> impl Future<Output = Result<Vec<Comment>, Self::Error>> + Send + '_;

  /// The top-level comment of the thread containing `parent_id`, or `None`
  /// if `parent_id` is unknown.
  fn resolve_root_id(
    &self,
    parent_id: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

pub trait OutboxStore: Backend {
  /// Oldest undispatched events that are not flagged for inspection, in
  /// creation order.
  fn pending_events(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<OutboxEvent>, Self::Error>> + Send + '_;

  /// Upsert the derived notifications and mark the event dispatched, in one
  /// transaction. Returns the number of notifications newly inserted.
  fn complete_event(
    &self,
    event_id: i64,
    notifications: Vec<NewNotification>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Count a failed attempt. Returns `true` if the event reached
  /// `max_attempts` and is now flagged.
  fn record_dispatch_failure(
    &self,
    event_id: i64,
    error: String,
    max_attempts: u32,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

// ─── Notifications ───────────────────────────────────────────────────────────

pub trait NotificationStore: Backend {
  fn list_notifications<'a>(
    &'a self,
    query: &'a NotificationQuery,
  ) -> impl Future<Output = Result<NotificationPage, Self::Error>> + Send + 'a;

  fn list_grouped_notifications<'a>(
    &'a self,
    query: &'a GroupedNotificationQuery,
  ) -> impl Future<Output = Result<GroupedNotificationPage, Self::Error>> + Send + 'a;

  /// Set `seen_at` on unseen notifications of `recipient` (optionally only
  /// `ids`, optionally only from `apps`). Returns the number updated.
  fn mark_seen(
    &self,
    recipient: String,
    apps: Vec<String>,
    ids: Option<Vec<i64>>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}

// ─── Reference resolution results ────────────────────────────────────────────

/// What happened to a re-resolution write.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionWrite {
  Stored(CommentReferenceResolutionResult),
  /// The comment was edited after the resolution started.
  StaleRevision { current: u32 },
  CommentDeleted,
  CommentMissing,
}

pub trait ReferenceResultStore: Backend {
  /// Results with status `failed` or `partial` whose current revision first
  /// failed within `max_age`, least recently attempted first. Retrying does
  /// not extend the window.
  fn refresh_candidates(
    &self,
    max_age: Duration,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<CommentReferenceResolutionResult>, Self::Error>> + Send + '_;

  /// Store a re-resolution for `revision` while holding the write lock on the
  /// comment; on success also publishes `CommentReferencesUpdated`.
  fn store_resolution(
    &self,
    comment_id: String,
    revision: u32,
    resolution: ReferenceResolution,
  ) -> impl Future<Output = Result<ResolutionWrite, Self::Error>> + Send + '_;

  fn get_resolution(
    &self,
    comment_id: String,
  ) -> impl Future<Output = Result<Option<CommentReferenceResolutionResult>, Self::Error>> + Send + '_;
}
