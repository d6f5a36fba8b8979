//! Query parameters shared by the notification listings.

use std::str::FromStr as _;

use quill_core::{
  comment::normalize_address,
  cursor::{Cursor, PageRequest},
  notification::{NotificationFilter, NotificationType},
};
use quill_resolver::identity::IdentityLookup;
use serde::Deserialize;

use crate::error::ApiError;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;
pub const DEFAULT_GROUP_LIMIT: usize = 3;
pub const MAX_GROUP_LIMIT: usize = 20;

/// Raw parameters of `GET /notifications` and `GET /notifications/grouped`.
/// Everything arrives as text so malformed values map to a JSON 400.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
  /// Recipient as an address or ENS name.
  pub user:        Option<String>,
  /// Comma-separated app-signer allow-list.
  pub app:         Option<String>,
  pub before:      Option<String>,
  pub after:       Option<String>,
  pub limit:       Option<String>,
  /// Comma-separated notification types.
  #[serde(rename = "type")]
  pub types:       Option<String>,
  pub seen:        Option<String>,
  /// Grouped listing only.
  pub group_limit: Option<String>,
}

impl ListParams {
  pub async fn filter<I: IdentityLookup>(&self, identity: &I) -> Result<NotificationFilter, ApiError> {
    let recipient = resolve_user(identity, self.user.as_deref()).await?;
    Ok(NotificationFilter {
      recipient,
      apps: split_addresses(self.app.as_deref()),
      types: parse_types(self.types.as_deref())?,
      seen: parse_seen(self.seen.as_deref())?,
    })
  }

  pub fn page<C: Cursor>(&self) -> Result<PageRequest<C>, ApiError> {
    PageRequest::from_params(self.before.as_deref(), self.after.as_deref())
      .map_err(|e| ApiError::BadRequest(e.to_string()))
  }

  pub fn limit(&self) -> Result<usize, ApiError> {
    parse_bounded("limit", self.limit.as_deref(), DEFAULT_LIMIT, MAX_LIMIT)
  }

  pub fn group_limit(&self) -> Result<usize, ApiError> {
    parse_bounded(
      "groupLimit",
      self.group_limit.as_deref(),
      DEFAULT_GROUP_LIMIT,
      MAX_GROUP_LIMIT,
    )
  }
}

/// Resolve `user` to a lowercase address. A missing or unresolvable user is
/// a bad request.
pub async fn resolve_user<I: IdentityLookup>(
  identity: &I,
  user: Option<&str>,
) -> Result<String, ApiError> {
  let user = user
    .map(str::trim)
    .filter(|u| !u.is_empty())
    .ok_or_else(|| ApiError::BadRequest("`user` is required".into()))?;
  identity
    .resolve_user(user)
    .await?
    .ok_or_else(|| ApiError::BadRequest(format!("could not resolve user {user:?}")))
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
  raw
    .unwrap_or_default()
    .split(',')
    .map(str::trim)
    .filter(|t| !t.is_empty())
}

/// Comma-separated addresses, normalised.
pub fn split_addresses(raw: Option<&str>) -> Vec<String> {
  split_list(raw).map(normalize_address).collect()
}

pub fn parse_types(raw: Option<&str>) -> Result<Vec<NotificationType>, ApiError> {
  split_list(raw)
    .map(|t| {
      NotificationType::from_str(&t.to_ascii_lowercase())
        .map_err(|_| ApiError::BadRequest(format!("unknown notification type {t:?}")))
    })
    .collect()
}

pub fn parse_seen(raw: Option<&str>) -> Result<Option<bool>, ApiError> {
  match raw.map(str::trim) {
    None | Some("") => Ok(None),
    Some("true" | "1") => Ok(Some(true)),
    Some("false" | "0") => Ok(Some(false)),
    Some(other) => Err(ApiError::BadRequest(format!(
      "`seen` must be one of true, false, 1, 0; got {other:?}"
    ))),
  }
}

fn parse_bounded(
  name: &str,
  raw: Option<&str>,
  default: usize,
  max: usize,
) -> Result<usize, ApiError> {
  let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
    return Ok(default);
  };
  match raw.parse::<usize>() {
    Ok(n) if (1..=max).contains(&n) => Ok(n),
    _ => Err(ApiError::BadRequest(format!(
      "`{name}` must be an integer between 1 and {max}"
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn limit_bounds() {
    assert_eq!(parse_bounded("limit", None, 10, 100).unwrap(), 10);
    assert_eq!(parse_bounded("limit", Some("100"), 10, 100).unwrap(), 100);
    assert!(parse_bounded("limit", Some("0"), 10, 100).is_err());
    assert!(parse_bounded("limit", Some("101"), 10, 100).is_err());
    assert!(parse_bounded("limit", Some("ten"), 10, 100).is_err());
  }

  #[test]
  fn seen_accepts_words_and_digits() {
    assert_eq!(parse_seen(Some("1")).unwrap(), Some(true));
    assert_eq!(parse_seen(Some("false")).unwrap(), Some(false));
    assert_eq!(parse_seen(None).unwrap(), None);
    assert!(parse_seen(Some("yes")).is_err());
  }

  #[test]
  fn types_and_apps_are_comma_lists() {
    assert_eq!(
      parse_types(Some("reply, Mention")).unwrap(),
      vec![NotificationType::Reply, NotificationType::Mention]
    );
    assert!(parse_types(Some("reply,like")).is_err());
    assert_eq!(split_addresses(Some(" 0xAB ,,0xcd")), vec!["0xab", "0xcd"]);
    assert!(split_addresses(None).is_empty());
  }
}
