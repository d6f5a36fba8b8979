//! References found in comment content and the stored outcome of resolving
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Byte range of the reference inside the comment content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
  pub start: usize,
  pub end:   usize,
}

/// A resolved reference. The variant name is the `type` tag on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reference {
  Ens {
    position:   Position,
    address:    String,
    name:       String,
    #[serde(rename = "avatarUrl")]
    avatar_url: Option<String>,
  },
  Farcaster {
    position:     Position,
    address:      String,
    fid:          u64,
    username:     String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "pfpUrl")]
    pfp_url:      Option<String>,
  },
  Erc20 {
    position: Position,
    address:  String,
    #[serde(rename = "chainId")]
    chain_id: u64,
    symbol:   String,
    name:     String,
    decimals: u8,
    #[serde(rename = "logoUrl")]
    logo_url: Option<String>,
  },
  Webpage {
    position:   Position,
    url:        String,
    title:      Option<String>,
    #[serde(rename = "mediaType")]
    media_type: String,
  },
  Quote {
    position:   Position,
    #[serde(rename = "commentId")]
    comment_id: String,
  },
  /// A raw `@0x…` mention with no name attached.
  Address { position: Position, address: String },
}

impl Reference {
  /// The address this reference notifies, if it is a mention.
  pub fn mentioned_address(&self) -> Option<&str> {
    match self {
      Self::Ens { address, .. }
      | Self::Farcaster { address, .. }
      | Self::Address { address, .. } => Some(address),
      Self::Erc20 { .. } | Self::Webpage { .. } | Self::Quote { .. } => None,
    }
  }

  /// The comment this reference quotes, if any.
  pub fn quoted_comment(&self) -> Option<&str> {
    match self {
      Self::Quote { comment_id, .. } => Some(comment_id),
      _ => None,
    }
  }
}

/// Aggregate outcome of one resolution pass over a comment.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResolutionStatus {
  /// Every candidate resolved (or was definitively not found).
  Success,
  /// Some candidates failed with retryable errors.
  Partial,
  /// Every candidate failed with retryable errors.
  Failed,
}

impl ResolutionStatus {
  pub fn needs_retry(self) -> bool { !matches!(self, Self::Success) }
}

/// Output of a resolver pass, before it is tied to a comment revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceResolution {
  pub references: Vec<Reference>,
  pub status:     ResolutionStatus,
}

/// The persisted result for one comment. Overwritten on every re-resolution,
/// but never by a result for an older revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentReferenceResolutionResult {
  pub comment_id:       String,
  pub comment_revision: u32,
  pub references:       Vec<Reference>,
  pub status:           ResolutionStatus,
  pub updated_at:       DateTime<Utc>,
}
