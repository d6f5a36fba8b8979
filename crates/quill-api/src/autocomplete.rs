//! `GET /autocomplete?prefix=<text>`: ENS name suggestions for mentions.

use axum::{
  Json,
  extract::{Query, State},
};
use quill_resolver::{ens::EnsProfile, identity::IdentityLookup};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

/// Minimum prefix length after a leading `@` is stripped.
pub const MIN_PREFIX_LEN: usize = 2;

#[derive(Debug, Deserialize)]
pub struct AutocompleteParams {
  pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AutocompleteResponse {
  pub results: Vec<EnsProfile>,
}

pub async fn handler<S, I>(
  State(state): State<AppState<S, I>>,
  Query(params): Query<AutocompleteParams>,
) -> Result<Json<AutocompleteResponse>, ApiError>
where
  S: Send + Sync,
  I: IdentityLookup,
{
  let prefix = params
    .prefix
    .as_deref()
    .map(|p| p.trim().trim_start_matches('@').to_ascii_lowercase())
    .unwrap_or_default();
  if prefix.chars().count() < MIN_PREFIX_LEN {
    return Err(ApiError::BadRequest(format!(
      "`prefix` must be at least {MIN_PREFIX_LEN} characters"
    )));
  }

  let results = state.identity.suggest(&prefix).await?;
  Ok(Json(AutocompleteResponse { results }))
}
