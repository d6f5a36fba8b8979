//! HMAC-SHA256 signing for webhook requests.
//!
//! The signed message is the canonical query string (pairs sorted by key,
//! then value) followed by `|` and the raw body. The signature travels
//! hex-encoded in [`SIGNATURE_HEADER`]; the unix timestamp travels as the
//! [`TIMESTAMP_PARAM`] query parameter and is therefore covered by the
//! signature.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-quill-signature";
pub const TIMESTAMP_PARAM: &str = "timestamp";
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
  #[error("missing timestamp")]
  MissingTimestamp,
  #[error("invalid timestamp: {0:?}")]
  InvalidTimestamp(String),
  #[error("timestamp outside the allowed window")]
  Expired,
  #[error("missing signature")]
  MissingSignature,
  #[error("malformed signature")]
  MalformedSignature,
  #[error("signature mismatch")]
  SignatureMismatch,
  #[error("signing key is empty or unusable")]
  InvalidKey,
}

/// Sorted `key=value&…` form of `params`. `%`, `&`, `=` and `|` are escaped
/// so distinct parameter sets never share a canonical form.
pub fn canonical_query(params: &[(String, String)]) -> String {
  let mut pairs: Vec<(String, String)> = params
    .iter()
    .map(|(k, v)| (escape(k), escape(v)))
    .collect();
  pairs.sort();
  pairs
    .into_iter()
    .map(|(k, v)| format!("{k}={v}"))
    .collect::<Vec<_>>()
    .join("&")
}

fn escape(s: &str) -> String {
  s.replace('%', "%25")
    .replace('&', "%26")
    .replace('=', "%3D")
    .replace('|', "%7C")
}

fn mac_for(
  secret: &[u8],
  params: &[(String, String)],
  body: &[u8],
) -> Result<HmacSha256, WebhookError> {
  if secret.is_empty() {
    return Err(WebhookError::InvalidKey);
  }
  let mut mac =
    <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| WebhookError::InvalidKey)?;
  mac.update(canonical_query(params).as_bytes());
  mac.update(b"|");
  mac.update(body);
  Ok(mac)
}

/// Hex-encoded HMAC-SHA256 over `canonical_query(params) | body`. An empty
/// secret is rejected.
pub fn sign(
  secret: &[u8],
  params: &[(String, String)],
  body: &[u8],
) -> Result<String, WebhookError> {
  Ok(hex::encode(mac_for(secret, params, body)?.finalize().into_bytes()))
}

/// Check a signed request. The timestamp must be present and within
/// `max_age` of `now` in either direction; the comparison of signatures is
/// constant-time.
pub fn verify(
  secret: &[u8],
  params: &[(String, String)],
  body: &[u8],
  signature: Option<&str>,
  now: DateTime<Utc>,
  max_age: Duration,
) -> Result<(), WebhookError> {
  let raw_ts = params
    .iter()
    .find(|(k, _)| k == TIMESTAMP_PARAM)
    .map(|(_, v)| v.as_str())
    .ok_or(WebhookError::MissingTimestamp)?;
  let ts: i64 = raw_ts
    .parse()
    .map_err(|_| WebhookError::InvalidTimestamp(raw_ts.to_owned()))?;

  if now.timestamp().abs_diff(ts) > max_age.as_secs() {
    return Err(WebhookError::Expired);
  }

  let signature = signature.ok_or(WebhookError::MissingSignature)?;
  let expected = hex::decode(signature.trim()).map_err(|_| WebhookError::MalformedSignature)?;

  mac_for(secret, params, body)?
    .verify_slice(&expected)
    .map_err(|_| WebhookError::SignatureMismatch)
}
