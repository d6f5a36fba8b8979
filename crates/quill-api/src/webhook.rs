//! `GET /webhooks/moderation`: the moderation collaborator's decision
//! callback.
//!
//! Query: `commentId`, `decision` (`approved` | `rejected` | `pending`) and
//! `timestamp` (unix seconds). The request is signed with HMAC-SHA256 over
//! the sorted query and the body; see [`quill_core::webhook`].

use std::str::FromStr as _;

use axum::{
  Json,
  body::Bytes,
  extract::{Query, State},
  http::HeaderMap,
};
use chrono::Utc;
use quill_core::{
  moderation::ModerationStatus,
  store::CommentStore,
  webhook::{SIGNATURE_HEADER, verify},
};
use quill_resolver::identity::IdentityLookup;
use serde::Serialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationResponse {
  pub id:                String,
  pub moderation_status: ModerationStatus,
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Result<&'a str, ApiError> {
  params
    .iter()
    .find(|(k, _)| k == name)
    .map(|(_, v)| v.as_str())
    .ok_or_else(|| ApiError::BadRequest(format!("`{name}` is required")))
}

pub async fn moderation<S, I>(
  State(state): State<AppState<S, I>>,
  headers: HeaderMap,
  Query(params): Query<Vec<(String, String)>>,
  body: Bytes,
) -> Result<Json<ModerationResponse>, ApiError>
where
  S: CommentStore,
  I: IdentityLookup,
{
  let signature = headers
    .get(SIGNATURE_HEADER)
    .and_then(|v| v.to_str().ok());
  verify(
    state.webhook.secret.as_bytes(),
    &params,
    &body,
    signature,
    Utc::now(),
    state.webhook.max_age,
  )
  .map_err(|e| {
    tracing::warn!(error = %e, "rejected moderation webhook");
    ApiError::Unauthorized(e.to_string())
  })?;

  let comment_id = param(&params, "commentId")?.to_owned();
  let decision = param(&params, "decision")?;
  let status = ModerationStatus::from_str(decision)
    .map_err(|_| ApiError::BadRequest(format!("unknown decision {decision:?}")))?;

  let existing = state
    .store
    .get_comment(comment_id.clone())
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  if existing.is_none() {
    return Err(ApiError::NotFound(format!("comment {comment_id}")));
  }

  let comment = state
    .store
    .set_moderation_status(comment_id, status)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  tracing::info!(comment_id = %comment.id, status = %comment.moderation_status, "moderation decision applied");

  Ok(Json(ModerationResponse {
    id:                comment.id,
    moderation_status: comment.moderation_status,
  }))
}
