//! [`NotificationStore`] for [`SqliteStore`]: the flat and grouped listings.
//!
//! Both listings page by keyset. The flat one pages over `notification_id`.
//! The grouped one pages over the `(updated_at_us, notification_id)` of each
//! group's head row, where a head is a row with no newer sibling under the
//! same `(recipient, app, type, parent)` key. Page boundaries are decided by
//! comparing the page against independently queried newest/oldest sentinels.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, params_from_iter, types::Value};

use quill_core::{
  cursor::{Cursor, FlatCursor, GroupCursor, PageRequest},
  notification::{
    GroupKey, GroupedNotificationPage, GroupedNotificationQuery, Notification,
    NotificationFilter, NotificationGroup, NotificationPage, NotificationQuery, PageInfo,
  },
  store::NotificationStore,
};

use crate::{
  Result, SqliteStore,
  encode::{NOTIFICATION_COLUMNS, RawNotification, encode_dt, notification_columns},
};

// ─── SQL building ────────────────────────────────────────────────────────────

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

/// `WHERE` conditions for `filter` against the table aliased `alias`.
/// Parameters are appended to `params` in textual order.
fn filter_clause(
  alias: &str,
  filter: &NotificationFilter,
  seen: Option<bool>,
  params: &mut Vec<Value>,
) -> String {
  let mut clause = format!("{alias}.recipient_address = ?");
  params.push(Value::Text(filter.recipient.clone()));

  if !filter.apps.is_empty() {
    clause.push_str(&format!(
      " AND {alias}.app_signer IN ({})",
      placeholders(filter.apps.len())
    ));
    params.extend(filter.apps.iter().cloned().map(Value::Text));
  }
  if !filter.types.is_empty() {
    clause.push_str(&format!(
      " AND {alias}.notification_type IN ({})",
      placeholders(filter.types.len())
    ));
    params.extend(filter.types.iter().map(|t| Value::Text(t.to_string())));
  }
  match seen {
    Some(true) => clause.push_str(&format!(" AND {alias}.seen_at IS NOT NULL")),
    Some(false) => clause.push_str(&format!(" AND {alias}.seen_at IS NULL")),
    None => {}
  }

  clause.push_str(&format!(
    " AND NOT EXISTS (SELECT 1 FROM comments dc
        WHERE dc.comment_id = {alias}.entity_id AND dc.deleted_at IS NOT NULL)"
  ));
  clause
}

/// Conditions selecting group heads among the rows matching `filter`.
fn head_clause(filter: &NotificationFilter, params: &mut Vec<Value>) -> String {
  let outer = filter_clause("n", filter, filter.seen, params);
  let inner = filter_clause("s", filter, filter.seen, params);
  format!(
    "{outer} AND NOT EXISTS (
       SELECT 1 FROM notifications s
       WHERE s.recipient_address = n.recipient_address
         AND s.app_signer        = n.app_signer
         AND s.notification_type = n.notification_type
         AND s.parent_id         = n.parent_id
         AND {inner}
         AND (s.updated_at_us > n.updated_at_us
              OR (s.updated_at_us = n.updated_at_us
                  AND s.notification_id > n.notification_id)))"
  )
}

fn query_notifications(
  conn: &Connection,
  sql: &str,
  params: Vec<Value>,
) -> Result<Vec<Notification>> {
  let mut stmt = conn.prepare(sql)?;
  let raws = stmt
    .query_map(params_from_iter(params), RawNotification::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawNotification::into_notification).collect()
}

fn count_unseen(conn: &Connection, filter: &NotificationFilter) -> Result<u64> {
  let mut params = Vec::new();
  let clause = filter_clause("n", filter, Some(false), &mut params);
  let count: i64 = conn.query_row(
    &format!("SELECT COUNT(*) FROM notifications n WHERE {clause}"),
    params_from_iter(params),
    |r| r.get(0),
  )?;
  Ok(count as u64)
}

// ─── Page info ───────────────────────────────────────────────────────────────

/// Boundary flags for a page whose rows span `first..=last` (newest to
/// oldest), given the newest and oldest cursors matching the filter overall.
fn page_info<C: Cursor>(
  first: Option<C>,
  last: Option<C>,
  page: PageRequest<C>,
  newest: Option<C>,
  oldest: Option<C>,
) -> PageInfo<C> {
  match (first, last) {
    (Some(first), Some(last)) => PageInfo {
      has_next_page:     oldest.is_some_and(|o| last > o),
      has_previous_page: newest.is_some_and(|n| first < n),
      start_cursor:      Some(first),
      end_cursor:        Some(last),
    },
    _ => PageInfo {
      // An empty page past either end still reports what lies behind the
      // cursor it was requested from.
      has_next_page: match page {
        PageRequest::After(c) => oldest.is_some_and(|o| o <= c),
        _ => false,
      },
      has_previous_page: match page {
        PageRequest::Before(c) => newest.is_some_and(|n| n >= c),
        _ => false,
      },
      ..PageInfo::empty()
    },
  }
}

// ─── Flat listing ────────────────────────────────────────────────────────────

fn flat_sentinels(
  conn: &Connection,
  filter: &NotificationFilter,
) -> Result<(Option<FlatCursor>, Option<FlatCursor>)> {
  let mut params = Vec::new();
  let clause = filter_clause("n", filter, filter.seen, &mut params);
  let (newest, oldest): (Option<i64>, Option<i64>) = conn.query_row(
    &format!(
      "SELECT MAX(n.notification_id), MIN(n.notification_id) FROM notifications n WHERE {clause}"
    ),
    params_from_iter(params),
    |r| Ok((r.get(0)?, r.get(1)?)),
  )?;
  Ok((newest.map(|id| FlatCursor { id }), oldest.map(|id| FlatCursor { id })))
}

fn list_flat(conn: &Connection, query: &NotificationQuery) -> Result<NotificationPage> {
  let mut params = Vec::new();
  let clause = filter_clause("n", &query.filter, query.filter.seen, &mut params);
  let (keyset, order) = match query.page {
    PageRequest::First => ("", "DESC"),
    PageRequest::Before(c) => {
      params.push(Value::Integer(c.id));
      (" AND n.notification_id < ?", "DESC")
    }
    PageRequest::After(c) => {
      params.push(Value::Integer(c.id));
      (" AND n.notification_id > ?", "ASC")
    }
  };
  params.push(Value::Integer(query.limit.max(1) as i64));

  let sql = format!(
    "SELECT {cols} FROM notifications n
     WHERE {clause}{keyset}
     ORDER BY n.notification_id {order}
     LIMIT ?",
    cols = notification_columns("n"),
  );
  let mut notifications = query_notifications(conn, &sql, params)?;
  if matches!(query.page, PageRequest::After(_)) {
    notifications.reverse();
  }

  let (newest, oldest) = flat_sentinels(conn, &query.filter)?;
  let page_info = page_info(
    notifications.first().map(|n| FlatCursor { id: n.id }),
    notifications.last().map(|n| FlatCursor { id: n.id }),
    query.page,
    newest,
    oldest,
  );

  Ok(NotificationPage {
    notifications,
    page_info,
    unseen_count: count_unseen(conn, &query.filter)?,
  })
}

// ─── Grouped listing ─────────────────────────────────────────────────────────

fn head_sentinel(
  conn: &Connection,
  filter: &NotificationFilter,
  order: &str,
) -> Result<Option<GroupCursor>> {
  let mut params = Vec::new();
  let clause = head_clause(filter, &mut params);
  let cursor = conn
    .query_row(
      &format!(
        "SELECT n.updated_at_us, n.notification_id FROM notifications n
         WHERE {clause}
         ORDER BY n.updated_at_us {order}, n.notification_id {order}
         LIMIT 1"
      ),
      params_from_iter(params),
      |r| Ok(GroupCursor { us: r.get(0)?, id: r.get(1)? }),
    )
    .optional()?;
  Ok(cursor)
}

/// Members and unseen counts of every group headed by `heads`, in one
/// windowed query. Members are ranked among the rows matching the full
/// filter; the unseen count ignores the `seen` filter.
fn load_groups(
  conn: &Connection,
  filter: &NotificationFilter,
  heads: &[Notification],
  group_limit: usize,
) -> Result<Vec<NotificationGroup>> {
  if heads.is_empty() {
    return Ok(Vec::new());
  }
  let group_limit = group_limit.max(1);

  let mut params = Vec::new();
  for head in heads {
    params.extend([
      Value::Text(head.app_signer.clone()),
      Value::Text(head.notification_type.to_string()),
      Value::Text(head.parent_id.clone()),
    ]);
  }
  let keys = vec!["(?, ?, ?)"; heads.len()].join(", ");
  let clause = filter_clause("n", filter, None, &mut params);
  let in_view = match filter.seen {
    Some(true) => "n.seen_at IS NOT NULL",
    Some(false) => "n.seen_at IS NULL",
    None => "1",
  };
  params.push(Value::Integer(group_limit as i64 + 1));

  let sql = format!(
    "WITH page_keys(app_signer, notification_type, parent_id) AS (VALUES {keys}),
     ranked AS (
       SELECT {cols},
              ({in_view}) AS in_view,
              ROW_NUMBER() OVER (
                PARTITION BY n.app_signer, n.notification_type, n.parent_id, ({in_view})
                ORDER BY n.updated_at_us DESC, n.notification_id DESC
              ) AS member_rank,
              SUM(n.seen_at IS NULL) OVER (
                PARTITION BY n.app_signer, n.notification_type, n.parent_id
              ) AS group_unseen
       FROM notifications n
       JOIN page_keys k
         ON k.app_signer = n.app_signer
        AND k.notification_type = n.notification_type
        AND k.parent_id = n.parent_id
       WHERE {clause}
     )
     SELECT {plain}, member_rank, group_unseen FROM ranked
     WHERE in_view AND member_rank <= ?
     ORDER BY updated_at_us DESC, notification_id DESC",
    cols = notification_columns("n"),
    plain = NOTIFICATION_COLUMNS.join(", "),
  );

  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(params_from_iter(params), |r| {
      Ok((
        RawNotification::from_row(r)?,
        r.get::<_, i64>("member_rank")?,
        r.get::<_, i64>("group_unseen")?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut members: HashMap<(String, String, String), (Vec<Notification>, bool, u64)> =
    HashMap::new();
  for (raw, rank, unseen) in rows {
    let n = raw.into_notification()?;
    let entry = members
      .entry((n.app_signer.clone(), n.notification_type.to_string(), n.parent_id.clone()))
      .or_default();
    entry.2 = unseen as u64;
    if rank as usize > group_limit {
      entry.1 = true;
    } else {
      entry.0.push(n);
    }
  }

  Ok(
    heads
      .iter()
      .map(|head| {
        let key = (
          head.app_signer.clone(),
          head.notification_type.to_string(),
          head.parent_id.clone(),
        );
        let (notifications, has_next_page, unseen_count) =
          members.remove(&key).unwrap_or_default();
        NotificationGroup {
          key: GroupKey {
            notification_type: head.notification_type,
            parent_id:         head.parent_id.clone(),
            app_signer:        head.app_signer.clone(),
          },
          cursor: GroupCursor::new(head.updated_at, head.id),
          updated_at: head.updated_at,
          unseen_count,
          notifications,
          has_next_page,
        }
      })
      .collect(),
  )
}

fn list_grouped(
  conn: &Connection,
  query: &GroupedNotificationQuery,
) -> Result<GroupedNotificationPage> {
  let mut params = Vec::new();
  let clause = head_clause(&query.filter, &mut params);
  let (keyset, order, cursor) = match query.page {
    PageRequest::First => ("", "DESC", None),
    PageRequest::Before(c) => (
      " AND (n.updated_at_us < ? OR (n.updated_at_us = ? AND n.notification_id < ?))",
      "DESC",
      Some(c),
    ),
    PageRequest::After(c) => (
      " AND (n.updated_at_us > ? OR (n.updated_at_us = ? AND n.notification_id > ?))",
      "ASC",
      Some(c),
    ),
  };
  if let Some(c) = cursor {
    params.extend([Value::Integer(c.us), Value::Integer(c.us), Value::Integer(c.id)]);
  }
  params.push(Value::Integer(query.limit.max(1) as i64));

  let sql = format!(
    "SELECT {cols} FROM notifications n
     WHERE {clause}{keyset}
     ORDER BY n.updated_at_us {order}, n.notification_id {order}
     LIMIT ?",
    cols = notification_columns("n"),
  );
  let mut heads = query_notifications(conn, &sql, params)?;
  if matches!(query.page, PageRequest::After(_)) {
    heads.reverse();
  }

  let groups = load_groups(conn, &query.filter, &heads, query.group_limit)?;

  let page_info = page_info(
    groups.first().map(|g| g.cursor),
    groups.last().map(|g| g.cursor),
    query.page,
    head_sentinel(conn, &query.filter, "DESC")?,
    head_sentinel(conn, &query.filter, "ASC")?,
  );

  Ok(GroupedNotificationPage {
    groups,
    page_info,
    unseen_count: count_unseen(conn, &query.filter)?,
  })
}

// ─── NotificationStore ───────────────────────────────────────────────────────

impl NotificationStore for SqliteStore {
  async fn list_notifications<'a>(&'a self, query: &'a NotificationQuery) -> Result<NotificationPage> {
    let query = query.clone();
    self.read(move |conn| list_flat(conn, &query)).await
  }

  async fn list_grouped_notifications<'a>(
    &'a self,
    query: &'a GroupedNotificationQuery,
  ) -> Result<GroupedNotificationPage> {
    let query = query.clone();
    self.read(move |conn| list_grouped(conn, &query)).await
  }

  async fn mark_seen(
    &self,
    recipient: String,
    apps: Vec<String>,
    ids: Option<Vec<i64>>,
  ) -> Result<u64> {
    if ids.as_ref().is_some_and(Vec::is_empty) {
      return Ok(0);
    }

    self
      .write(move |tx| {
        let mut sql = String::from(
          "UPDATE notifications SET seen_at = ?
           WHERE recipient_address = ? AND seen_at IS NULL",
        );
        let mut params = vec![Value::Text(encode_dt(Utc::now())), Value::Text(recipient)];
        if !apps.is_empty() {
          sql.push_str(&format!(" AND app_signer IN ({})", placeholders(apps.len())));
          params.extend(apps.into_iter().map(Value::Text));
        }
        if let Some(ids) = ids {
          sql.push_str(&format!(" AND notification_id IN ({})", placeholders(ids.len())));
          params.extend(ids.into_iter().map(Value::Integer));
        }
        let updated = tx.execute(&sql, params_from_iter(params))?;
        Ok(updated as u64)
      })
      .await
  }
}
