//! Router tests against an in-memory SQLite store and a fixed identity
//! lookup.

use std::{collections::HashMap, sync::Arc};

use axum::{
  body::Body,
  http::{Method, Request, StatusCode, header},
  response::Response,
};
use chrono::{DateTime, Utc};
use quill_core::{
  comment::NewComment,
  moderation::ModerationStatus,
  notification::{NewNotification, NotificationType, notification_uid},
  store::{CommentStore, OutboxStore},
  webhook::{DEFAULT_MAX_AGE, SIGNATURE_HEADER, sign},
};
use quill_resolver::{
  ResolveError,
  ens::EnsProfile,
  identity::{AuthorProfile, IdentityLookup},
};
use quill_store_sqlite::SqliteStore;
use serde_json::Value;
use tower::ServiceExt as _;

use crate::{AppState, WebhookConfig, api_router};

const RECIPIENT: &str = "0x00000000000000000000000000000000000000b0";
const AUTHOR: &str = "0x00000000000000000000000000000000000000a0";
const APP: &str = "0x00000000000000000000000000000000000000c0";
const SECRET: &str = "moderation-secret";

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Knows one ENS name and one author profile.
struct FakeIdentity;

impl IdentityLookup for FakeIdentity {
  async fn resolve_user<'a>(&'a self, user: &'a str) -> Result<Option<String>, ResolveError> {
    match user {
      "alice.eth" => Ok(Some(RECIPIENT.into())),
      "down.eth" => Err(ResolveError::Timeout),
      u if u.starts_with("0x") && u.len() == 42 => Ok(Some(u.to_ascii_lowercase())),
      _ => Ok(None),
    }
  }

  async fn profiles(&self, addresses: Vec<String>) -> HashMap<String, AuthorProfile> {
    addresses
      .into_iter()
      .map(|address| {
        let mut profile = AuthorProfile::bare(address.clone());
        if address == AUTHOR {
          profile.ens = Some(ens("bob.eth", AUTHOR));
        }
        (address, profile)
      })
      .collect()
  }

  async fn suggest<'a>(&'a self, prefix: &'a str) -> Result<Vec<EnsProfile>, ResolveError> {
    Ok(
      [ens("alice.eth", RECIPIENT), ens("bob.eth", AUTHOR)]
        .into_iter()
        .filter(|p| p.name.starts_with(prefix))
        .collect(),
    )
  }
}

fn ens(name: &str, address: &str) -> EnsProfile {
  EnsProfile { address: address.into(), name: name.into(), avatar_url: None }
}

fn at(us: i64) -> DateTime<Utc> { DateTime::from_timestamp_micros(us).unwrap() }

fn notif(ty: NotificationType, parent: &str, entity: &str, us: i64) -> NewNotification {
  NewNotification {
    uid:               notification_uid(ty, 8453, parent, entity),
    notification_type: ty,
    chain_id:          8453,
    recipient_address: RECIPIENT.into(),
    author_address:    AUTHOR.into(),
    app_signer:        APP.into(),
    parent_id:         parent.into(),
    entity_id:         entity.into(),
    created_at:        at(us),
  }
}

async fn make_state() -> AppState<SqliteStore, FakeIdentity> {
  let store = SqliteStore::open_in_memory().await.unwrap();
  AppState {
    store:    Arc::new(store),
    identity: Arc::new(FakeIdentity),
    webhook:  Arc::new(WebhookConfig { secret: SECRET.into(), max_age: DEFAULT_MAX_AGE }),
  }
}

/// Two replies under `0xp1`, one mention under `0xp2`, all to RECIPIENT.
async fn seeded_state() -> AppState<SqliteStore, FakeIdentity> {
  let state = make_state().await;
  let s = &state.store;
  for id in ["0xp1", "0xp2", "0xe1", "0xe2", "0xe3"] {
    s.insert_comment(NewComment::new(id, 8453, AUTHOR, APP, "gm", Utc::now()))
      .await
      .unwrap();
  }
  let event_id = s.pending_events(1).await.unwrap()[0].id;
  s.complete_event(event_id, vec![
    notif(NotificationType::Reply, "0xp1", "0xe1", 1_000),
    notif(NotificationType::Reply, "0xp1", "0xe2", 2_000),
    notif(NotificationType::Mention, "0xp2", "0xe3", 3_000),
  ])
  .await
  .unwrap();
  state
}

async fn send(
  state: &AppState<SqliteStore, FakeIdentity>,
  method: Method,
  uri: &str,
  headers: Vec<(&str, String)>,
  body: Option<Value>,
) -> Response {
  let mut builder = Request::builder().method(method).uri(uri);
  for (k, v) in headers {
    builder = builder.header(k, v);
  }
  let body = match body {
    Some(json) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };
  api_router(state.clone())
    .oneshot(builder.body(body).unwrap())
    .await
    .unwrap()
}

async fn get(state: &AppState<SqliteStore, FakeIdentity>, uri: &str) -> Response {
  send(state, Method::GET, uri, vec![], None).await
}

async fn json(resp: Response) -> Value {
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

// ─── Flat listing ────────────────────────────────────────────────────────────

#[tokio::test]
async fn flat_listing_pages_with_cursors() {
  let state = seeded_state().await;

  let resp = get(&state, &format!("/notifications?user={RECIPIENT}&limit=2")).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let page = json(resp).await;
  let items = page["notifications"].as_array().unwrap();
  assert_eq!(items.len(), 2);
  assert_eq!(items[0]["type"], "mention");
  assert_eq!(items[0]["entityId"], "0xe3");
  assert_eq!(items[0]["author"]["ens"]["name"], "bob.eth");
  assert_eq!(page["unseenCount"], 3);
  assert_eq!(page["pageInfo"]["hasNextPage"], true);
  assert_eq!(page["pageInfo"]["hasPreviousPage"], false);

  let end = page["pageInfo"]["endCursor"].as_str().unwrap();
  let next = json(get(&state, &format!("/notifications?user={RECIPIENT}&limit=2&before={end}")).await).await;
  let items = next["notifications"].as_array().unwrap();
  assert_eq!(items.len(), 1);
  assert_eq!(items[0]["entityId"], "0xe1");
  assert_eq!(next["pageInfo"]["hasNextPage"], false);
  assert_eq!(next["pageInfo"]["hasPreviousPage"], true);
  assert_eq!(next["unseenCount"], 3);
}

#[tokio::test]
async fn flat_listing_accepts_ens_users_and_filters() {
  let state = seeded_state().await;
  let page = json(get(&state, "/notifications?user=alice.eth&type=reply&seen=false").await).await;
  let items = page["notifications"].as_array().unwrap();
  assert_eq!(items.len(), 2);
  assert!(items.iter().all(|n| n["type"] == "reply"));

  let other_app = "0x00000000000000000000000000000000000000c9";
  let page = json(get(&state, &format!("/notifications?user=alice.eth&app={other_app}")).await).await;
  assert!(page["notifications"].as_array().unwrap().is_empty());
  assert_eq!(page["pageInfo"]["startCursor"], Value::Null);
}

#[tokio::test]
async fn malformed_parameters_are_rejected() {
  let state = seeded_state().await;
  let cursor = quill_core::cursor::Cursor::encode(&quill_core::cursor::FlatCursor { id: 2 });
  let cases = [
    "/notifications".to_owned(),
    "/notifications?user=nobody.eth".to_owned(),
    format!("/notifications?user={RECIPIENT}&before={cursor}&after={cursor}"),
    format!("/notifications?user={RECIPIENT}&before=not-a-cursor"),
    format!("/notifications?user={RECIPIENT}&limit=0"),
    format!("/notifications?user={RECIPIENT}&limit=101"),
    format!("/notifications?user={RECIPIENT}&seen=maybe"),
    format!("/notifications?user={RECIPIENT}&type=like"),
    format!("/notifications/grouped?user={RECIPIENT}&groupLimit=0"),
  ];
  for uri in cases {
    let resp = get(&state, &uri).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
    assert!(json(resp).await["error"].is_string());
  }
}

#[tokio::test]
async fn identity_outage_is_a_bad_gateway() {
  let state = seeded_state().await;
  let resp = get(&state, "/notifications?user=down.eth").await;
  assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

// ─── Grouped listing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn grouped_listing_rolls_up_by_parent() {
  let state = seeded_state().await;
  let page = json(get(&state, &format!("/notifications/grouped?user={RECIPIENT}&groupLimit=1")).await).await;
  let groups = page["groups"].as_array().unwrap();
  assert_eq!(groups.len(), 2);

  assert_eq!(groups[0]["type"], "mention");
  assert_eq!(groups[0]["parentId"], "0xp2");

  assert_eq!(groups[1]["type"], "reply");
  assert_eq!(groups[1]["parentId"], "0xp1");
  assert_eq!(groups[1]["appSigner"], APP);
  assert_eq!(groups[1]["unseenCount"], 2);
  assert_eq!(groups[1]["hasNextPage"], true);
  let members = groups[1]["notifications"].as_array().unwrap();
  assert_eq!(members.len(), 1);
  assert_eq!(members[0]["entityId"], "0xe2");

  assert_eq!(page["unseenCount"], 3);
  assert_eq!(page["pageInfo"]["hasNextPage"], false);
}

#[tokio::test]
async fn grouped_cursor_walks_back_and_forth() {
  let state = seeded_state().await;
  let first = json(get(&state, &format!("/notifications/grouped?user={RECIPIENT}&limit=1")).await).await;
  assert_eq!(first["groups"][0]["parentId"], "0xp2");
  let end = first["pageInfo"]["endCursor"].as_str().unwrap().to_owned();

  let second = json(get(&state, &format!("/notifications/grouped?user={RECIPIENT}&limit=1&before={end}")).await).await;
  assert_eq!(second["groups"][0]["parentId"], "0xp1");
  assert_eq!(second["pageInfo"]["hasNextPage"], false);
  let start = second["pageInfo"]["startCursor"].as_str().unwrap().to_owned();

  let back = json(get(&state, &format!("/notifications/grouped?user={RECIPIENT}&limit=1&after={start}")).await).await;
  assert_eq!(back["groups"][0]["parentId"], "0xp2");
  assert_eq!(back["pageInfo"]["hasPreviousPage"], false);
}

// ─── Mark seen ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn mark_seen_updates_unseen_count() {
  let state = seeded_state().await;
  let listed = json(get(&state, &format!("/notifications?user={RECIPIENT}")).await).await;
  let first_id = listed["notifications"][0]["id"].clone();

  let resp = send(
    &state,
    Method::POST,
    "/notifications/seen",
    vec![],
    Some(serde_json::json!({ "user": "alice.eth", "ids": [first_id] })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json(resp).await["updated"], 1);

  let resp = send(
    &state,
    Method::POST,
    "/notifications/seen",
    vec![],
    Some(serde_json::json!({ "user": RECIPIENT, "app": APP })),
  )
  .await;
  assert_eq!(json(resp).await["updated"], 2);

  let listed = json(get(&state, &format!("/notifications?user={RECIPIENT}&seen=true")).await).await;
  assert_eq!(listed["notifications"].as_array().unwrap().len(), 3);
  assert_eq!(listed["unseenCount"], 0);
}

// ─── Autocomplete ────────────────────────────────────────────────────────────

#[tokio::test]
async fn autocomplete_suggests_names() {
  let state = make_state().await;
  let page = json(get(&state, "/autocomplete?prefix=%40ali").await).await;
  assert_eq!(page["results"][0]["name"], "alice.eth");
  assert_eq!(page["results"].as_array().unwrap().len(), 1);

  let resp = get(&state, "/autocomplete?prefix=a").await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ─── Moderation webhook ──────────────────────────────────────────────────────

fn webhook_params(comment_id: &str, decision: &str, ts: i64) -> Vec<(String, String)> {
  vec![
    ("commentId".into(), comment_id.into()),
    ("decision".into(), decision.into()),
    ("timestamp".into(), ts.to_string()),
  ]
}

fn webhook_uri(params: &[(String, String)]) -> String {
  let query = params
    .iter()
    .map(|(k, v)| format!("{k}={v}"))
    .collect::<Vec<_>>()
    .join("&");
  format!("/webhooks/moderation?{query}")
}

async fn call_webhook(
  state: &AppState<SqliteStore, FakeIdentity>,
  params: &[(String, String)],
  signature: Option<String>,
) -> Response {
  let headers = signature
    .map(|s| vec![(SIGNATURE_HEADER, s)])
    .unwrap_or_default();
  send(state, Method::GET, &webhook_uri(params), headers, None).await
}

async fn state_with_comment() -> AppState<SqliteStore, FakeIdentity> {
  let state = make_state().await;
  state
    .store
    .insert_comment(NewComment::new("0xaa", 8453, AUTHOR, APP, "gm", Utc::now()))
    .await
    .unwrap();
  state
}

#[tokio::test]
async fn signed_webhook_updates_moderation_status() {
  let state = state_with_comment().await;
  let params = webhook_params("0xaa", "approved", Utc::now().timestamp());
  let sig = sign(SECRET.as_bytes(), &params, b"").unwrap();

  let resp = call_webhook(&state, &params, Some(sig)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json(resp).await["moderationStatus"], "approved");

  let comment = state.store.get_comment("0xaa".into()).await.unwrap().unwrap();
  assert_eq!(comment.moderation_status, ModerationStatus::Approved);
  let events = state.store.pending_events(10).await.unwrap();
  assert_eq!(events.last().unwrap().event_type, "CommentModerationStatusUpdated");
}

#[tokio::test]
async fn altered_or_stale_webhooks_are_unauthorized() {
  let state = state_with_comment().await;
  let now = Utc::now().timestamp();

  let params = webhook_params("0xaa", "approved", now);
  let sig = sign(SECRET.as_bytes(), &params, b"").unwrap();
  let altered = webhook_params("0xaa", "rejected", now);
  let resp = call_webhook(&state, &altered, Some(sig)).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  let stale = webhook_params("0xaa", "approved", now - DEFAULT_MAX_AGE.as_secs() as i64 - 1);
  let sig = sign(SECRET.as_bytes(), &stale, b"").unwrap();
  let resp = call_webhook(&state, &stale, Some(sig)).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  let resp = call_webhook(&state, &params, None).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  let wrong_key = sign(b"other", &params, b"").unwrap();
  let resp = call_webhook(&state, &params, Some(wrong_key)).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  let comment = state.store.get_comment("0xaa".into()).await.unwrap().unwrap();
  assert_eq!(comment.moderation_status, ModerationStatus::Pending);
}

#[tokio::test]
async fn webhook_for_unknown_comment_is_not_found() {
  let state = make_state().await;
  let params = webhook_params("0xmissing", "rejected", Utc::now().timestamp());
  let sig = sign(SECRET.as_bytes(), &params, b"").unwrap();
  let resp = call_webhook(&state, &params, Some(sig)).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let params = webhook_params("0xmissing", "banned", Utc::now().timestamp());
  let sig = sign(SECRET.as_bytes(), &params, b"").unwrap();
  let resp = call_webhook(&state, &params, Some(sig)).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
