//! Opaque keyset cursors.
//!
//! A cursor is a small JSON object, base64url-encoded without padding. The
//! flat listing pages over `{id}`; the grouped listing over `{us, id}` where
//! `us` is the group's `updatedAt` in microseconds, so the cursor never loses
//! precision relative to the stored value.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Encode/decode behaviour shared by both cursor kinds. Cursors order the
/// same way as the rows they point at: greater is newer.
pub trait Cursor: Serialize + DeserializeOwned + Ord + Copy {
  fn encode(&self) -> String {
    // Serialising a plain struct of integers cannot fail.
    let json = serde_json::to_vec(self).unwrap_or_default();
    B64.encode(json)
  }

  fn decode(raw: &str) -> Result<Self> {
    let bytes = B64
      .decode(raw.trim())
      .map_err(|e| Error::InvalidCursor(format!("not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
      .map_err(|e| Error::InvalidCursor(format!("malformed cursor: {e}")))
  }
}

/// Position in the flat notification listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlatCursor {
  pub id: i64,
}

impl Cursor for FlatCursor {}

/// Position in the grouped listing: the head row's `(updatedAt, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupCursor {
  pub us: i64,
  pub id: i64,
}

impl GroupCursor {
  pub fn new(updated_at: DateTime<Utc>, id: i64) -> Self {
    Self { us: updated_at.timestamp_micros(), id }
  }
}

impl Cursor for GroupCursor {}

/// Which side of a cursor a page is requested from. `before` and `after` are
/// mutually exclusive, so the two can never be set together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest<C> {
  /// Newest items first.
  First,
  /// Items older than the cursor (the "next" page).
  Before(C),
  /// Items newer than the cursor (the "previous" page).
  After(C),
}

impl<C: Cursor> PageRequest<C> {
  /// Build from optional raw query parameters.
  pub fn from_params(before: Option<&str>, after: Option<&str>) -> Result<Self> {
    match (before, after) {
      (Some(_), Some(_)) => Err(Error::ConflictingCursors),
      (Some(b), None) => Ok(Self::Before(C::decode(b)?)),
      (None, Some(a)) => Ok(Self::After(C::decode(a)?)),
      (None, None) => Ok(Self::First),
    }
  }
}
