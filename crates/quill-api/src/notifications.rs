//! Handlers for `/notifications` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/notifications` | `user` required; `app`, `type`, `seen`, `before`/`after`, `limit` |
//! | `GET`  | `/notifications/grouped` | Same filters, plus `groupLimit` (default 3) |
//! | `POST` | `/notifications/seen` | Body: `{"user":"…","app":"0x…,0x…","ids":[1,2]}` |
//!
//! Authors are decorated with their ENS and Farcaster profiles, looked up in
//! one batch per page.

use std::collections::HashMap;

use axum::{
  Json,
  extract::{Query, State},
};
use chrono::{DateTime, Utc};
use quill_core::{
  cursor::{Cursor, FlatCursor, GroupCursor},
  notification::{
    GroupKey, GroupedNotificationQuery, Notification, NotificationGroup, NotificationQuery,
    PageInfo,
  },
  store::NotificationStore,
};
use quill_resolver::identity::{AuthorProfile, IdentityLookup};
use serde::{Deserialize, Serialize};

use crate::{
  AppState,
  error::ApiError,
  params::{ListParams, resolve_user, split_addresses},
};

// ─── Response shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfoView {
  pub has_next_page:     bool,
  pub has_previous_page: bool,
  pub start_cursor:      Option<String>,
  pub end_cursor:        Option<String>,
}

impl<C: Cursor> From<PageInfo<C>> for PageInfoView {
  fn from(info: PageInfo<C>) -> Self {
    Self {
      has_next_page:     info.has_next_page,
      has_previous_page: info.has_previous_page,
      start_cursor:      info.start_cursor.map(|c| c.encode()),
      end_cursor:        info.end_cursor.map(|c| c.encode()),
    }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
  #[serde(flatten)]
  pub notification: Notification,
  pub cursor:       String,
  pub author:       AuthorProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPageView {
  pub notifications: Vec<NotificationView>,
  pub page_info:     PageInfoView,
  pub unseen_count:  u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
  #[serde(flatten)]
  pub key:           GroupKey,
  pub cursor:        String,
  pub updated_at:    DateTime<Utc>,
  pub unseen_count:  u64,
  pub notifications: Vec<NotificationView>,
  pub has_next_page: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedPageView {
  pub groups:       Vec<GroupView>,
  pub page_info:    PageInfoView,
  pub unseen_count: u64,
}

// ─── Author enrichment ────────────────────────────────────────────────────────

async fn author_profiles<'n, I: IdentityLookup>(
  identity: &I,
  notifications: impl Iterator<Item = &'n Notification>,
) -> HashMap<String, AuthorProfile> {
  let authors: Vec<String> = notifications.map(|n| n.author_address.clone()).collect();
  if authors.is_empty() {
    return HashMap::new();
  }
  identity.profiles(authors).await
}

fn view(notification: Notification, profiles: &HashMap<String, AuthorProfile>) -> NotificationView {
  let author = profiles
    .get(&notification.author_address)
    .cloned()
    .unwrap_or_else(|| AuthorProfile::bare(notification.author_address.clone()));
  NotificationView {
    cursor: FlatCursor { id: notification.id }.encode(),
    notification,
    author,
  }
}

fn group_view(group: NotificationGroup, profiles: &HashMap<String, AuthorProfile>) -> GroupView {
  GroupView {
    key:           group.key,
    cursor:        group.cursor.encode(),
    updated_at:    group.updated_at,
    unseen_count:  group.unseen_count,
    notifications: group
      .notifications
      .into_iter()
      .map(|n| view(n, profiles))
      .collect(),
    has_next_page: group.has_next_page,
  }
}

// ─── Flat listing ─────────────────────────────────────────────────────────────

/// `GET /notifications`
pub async fn list<S, I>(
  State(state): State<AppState<S, I>>,
  Query(params): Query<ListParams>,
) -> Result<Json<NotificationPageView>, ApiError>
where
  S: NotificationStore,
  I: IdentityLookup,
{
  let page = params.page::<FlatCursor>()?;
  let limit = params.limit()?;
  let filter = params.filter(state.identity.as_ref()).await?;
  let query = NotificationQuery { filter, page, limit };
  let page = state
    .store
    .list_notifications(&query)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  let profiles = author_profiles(state.identity.as_ref(), page.notifications.iter()).await;
  Ok(Json(NotificationPageView {
    notifications: page
      .notifications
      .into_iter()
      .map(|n| view(n, &profiles))
      .collect(),
    page_info:     page.page_info.into(),
    unseen_count:  page.unseen_count,
  }))
}

// ─── Grouped listing ──────────────────────────────────────────────────────────

/// `GET /notifications/grouped`
pub async fn grouped<S, I>(
  State(state): State<AppState<S, I>>,
  Query(params): Query<ListParams>,
) -> Result<Json<GroupedPageView>, ApiError>
where
  S: NotificationStore,
  I: IdentityLookup,
{
  let page = params.page::<GroupCursor>()?;
  let limit = params.limit()?;
  let group_limit = params.group_limit()?;
  let filter = params.filter(state.identity.as_ref()).await?;
  let query = GroupedNotificationQuery { filter, page, limit, group_limit };
  let page = state
    .store
    .list_grouped_notifications(&query)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  let profiles = author_profiles(
    state.identity.as_ref(),
    page.groups.iter().flat_map(|g| g.notifications.iter()),
  )
  .await;
  Ok(Json(GroupedPageView {
    groups:       page
      .groups
      .into_iter()
      .map(|g| group_view(g, &profiles))
      .collect(),
    page_info:    page.page_info.into(),
    unseen_count: page.unseen_count,
  }))
}

// ─── Mark seen ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MarkSeenBody {
  pub user: String,
  /// Comma-separated app-signer allow-list.
  pub app:  Option<String>,
  /// Only these notifications; every unseen one when absent.
  pub ids:  Option<Vec<i64>>,
}

#[derive(Debug, Serialize)]
pub struct MarkSeenResponse {
  pub updated: u64,
}

/// `POST /notifications/seen`
pub async fn mark_seen<S, I>(
  State(state): State<AppState<S, I>>,
  Json(body): Json<MarkSeenBody>,
) -> Result<Json<MarkSeenResponse>, ApiError>
where
  S: NotificationStore,
  I: IdentityLookup,
{
  let recipient = resolve_user(state.identity.as_ref(), Some(&body.user)).await?;
  let updated = state
    .store
    .mark_seen(recipient, split_addresses(body.app.as_deref()), body.ids)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(MarkSeenResponse { updated }))
}
