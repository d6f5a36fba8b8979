//! Finding and resolving references in comment content.

use std::{future::Future, sync::LazyLock};

use futures::future::join_all;
use quill_core::{
  comment::normalize_address,
  reference::{Position, Reference, ReferenceResolution, ResolutionStatus},
};
use regex::Regex;

use crate::{
  ResolveError,
  cache::ResolverCache,
  ens::{EnsByAddress, EnsByName},
  erc20::{Erc20Fetcher, TokenKey},
  farcaster::{FarcasterByAddress, FarcasterByName},
  url::UrlFetcher,
};

// ─── Candidates ──────────────────────────────────────────────────────────────

/// Alternatives are tried in order at each position, so a full address or
/// `.eth` name wins over the shorter fname reading of the same text.
static CANDIDATES: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(concat!(
    r"(?P<address>@0x[0-9a-fA-F]{40})\b",
    r"|(?P<ens>@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.eth)\b",
    r"|(?P<token>\$0x[0-9a-fA-F]{40})\b",
    r"|\b(?P<comment>0x[0-9a-fA-F]{64})\b",
    r#"|(?P<url>https?://[^\s<>"'\)\]]+)"#,
    r"|(?P<fname>@[a-z0-9][a-z0-9-]{0,15})\b",
  ))
  .expect("valid candidate pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateKind {
  Address(String),
  EnsName(String),
  Fname(String),
  Token(String),
  CommentId(String),
  Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
  pub position: Position,
  pub kind:     CandidateKind,
}

/// Every reference-shaped span of `content`, in order of appearance. A
/// sigil glued to the word before it (`bob@example.com`) is not a mention.
pub fn extract_candidates(content: &str) -> Vec<Candidate> {
  CANDIDATES
    .captures_iter(content)
    .filter_map(|caps| {
      let whole = caps.get(0)?;
      if whole.as_str().starts_with(['@', '$']) && follows_word(content, whole.start()) {
        return None;
      }
      let position = Position { start: whole.start(), end: whole.end() };
      let text = |name: &str| caps.name(name).map(|m| m.as_str());
      let kind = if let Some(s) = text("address") {
        CandidateKind::Address(normalize_address(&s[1..]))
      } else if let Some(s) = text("ens") {
        CandidateKind::EnsName(s[1..].to_ascii_lowercase())
      } else if let Some(s) = text("token") {
        CandidateKind::Token(normalize_address(&s[1..]))
      } else if let Some(s) = text("comment") {
        CandidateKind::CommentId(s.to_ascii_lowercase())
      } else if let Some(s) = text("url") {
        CandidateKind::Url(s.trim_end_matches(['.', ',', '!', '?', ';', ':']).to_owned())
      } else {
        CandidateKind::Fname(text("fname")?[1..].to_owned())
      };
      Some(Candidate { position, kind })
    })
    .collect()
}

fn follows_word(content: &str, at: usize) -> bool {
  content[..at]
    .chars()
    .next_back()
    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Resolved(Reference),
  NotFound,
  Failed(ResolveError),
}

/// Fold per-candidate outcomes into the stored resolution. Not-found counts
/// as settled; only upstream failures make a result worth retrying.
pub fn summarize(outcomes: Vec<Outcome>) -> ReferenceResolution {
  let total = outcomes.len();
  let mut failed = 0;
  let mut references = Vec::new();
  for outcome in outcomes {
    match outcome {
      Outcome::Resolved(r) => references.push(r),
      Outcome::NotFound => {}
      Outcome::Failed(_) => failed += 1,
    }
  }
  let status = match failed {
    0 => ResolutionStatus::Success,
    n if n == total => ResolutionStatus::Failed,
    _ => ResolutionStatus::Partial,
  };
  ReferenceResolution { references, status }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

pub trait ReferenceResolver: Send + Sync {
  fn resolve<'a>(
    &'a self,
    chain_id: u64,
    content: &'a str,
  ) -> impl Future<Output = ReferenceResolution> + Send + 'a;
}

/// [`ReferenceResolver`] backed by the resolver caches.
#[derive(Clone)]
pub struct CommentReferenceResolver {
  pub ens_by_address:       ResolverCache<EnsByAddress>,
  pub ens_by_name:          ResolverCache<EnsByName>,
  pub farcaster_by_address: ResolverCache<FarcasterByAddress>,
  pub farcaster_by_name:    ResolverCache<FarcasterByName>,
  pub erc20:                ResolverCache<Erc20Fetcher>,
  pub url:                  ResolverCache<UrlFetcher>,
}

impl CommentReferenceResolver {
  async fn resolve_candidate(&self, chain_id: u64, candidate: Candidate) -> Outcome {
    let position = candidate.position;
    let result = match candidate.kind {
      CandidateKind::Address(address) => self.resolve_address(position, address).await,
      CandidateKind::EnsName(name) => self.ens_by_name.load(name).await.map(|found| {
        found.map(|p| Reference::Ens {
          position,
          address: p.address,
          name: p.name,
          avatar_url: p.avatar_url,
        })
      }),
      CandidateKind::Fname(fname) => self.farcaster_by_name.load(fname).await.map(|found| {
        found.map(|p| Reference::Farcaster {
          position,
          address: p.address,
          fid: p.fid,
          username: p.username,
          display_name: p.display_name,
          pfp_url: p.pfp_url,
        })
      }),
      CandidateKind::Token(address) => self
        .erc20
        .load(TokenKey::new(chain_id, &address))
        .await
        .map(|found| {
          found.map(|t| Reference::Erc20 {
            position,
            address: t.address,
            chain_id: t.chain_id,
            symbol: t.symbol,
            name: t.name,
            decimals: t.decimals,
            logo_url: t.logo_url,
          })
        }),
      // Whether the quoted comment exists is checked when notifying.
      CandidateKind::CommentId(comment_id) => Ok(Some(Reference::Quote { position, comment_id })),
      CandidateKind::Url(url) => self.url.load(url).await.map(|found| {
        found.map(|w| Reference::Webpage {
          position,
          url: w.url,
          title: w.title,
          media_type: w.media_type,
        })
      }),
    };

    match result {
      Ok(Some(reference)) => Outcome::Resolved(reference),
      Ok(None) => Outcome::NotFound,
      Err(e) => Outcome::Failed(e),
    }
  }

  /// A raw address mention is always a reference; ENS then Farcaster only
  /// decorate it.
  async fn resolve_address(
    &self,
    position: Position,
    address: String,
  ) -> Result<Option<Reference>, ResolveError> {
    if let Some(p) = self.ens_by_address.load(address.clone()).await? {
      return Ok(Some(Reference::Ens {
        position,
        address: p.address,
        name: p.name,
        avatar_url: p.avatar_url,
      }));
    }
    if let Some(p) = self.farcaster_by_address.load(address.clone()).await? {
      return Ok(Some(Reference::Farcaster {
        position,
        address: p.address,
        fid: p.fid,
        username: p.username,
        display_name: p.display_name,
        pfp_url: p.pfp_url,
      }));
    }
    Ok(Some(Reference::Address { position, address }))
  }
}

impl ReferenceResolver for CommentReferenceResolver {
  async fn resolve<'a>(&'a self, chain_id: u64, content: &'a str) -> ReferenceResolution {
    let candidates = extract_candidates(content);
    let outcomes = join_all(
      candidates
        .into_iter()
        .map(|candidate| self.resolve_candidate(chain_id, candidate)),
    )
    .await;
    for outcome in &outcomes {
      if let Outcome::Failed(error) = outcome {
        tracing::debug!(%error, "reference candidate failed");
      }
    }
    summarize(outcomes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const ADDR: &str = "0x00000000000000000000000000000000000000Ab";

  fn kinds(content: &str) -> Vec<CandidateKind> {
    extract_candidates(content).into_iter().map(|c| c.kind).collect()
  }

  #[test]
  fn extracts_each_kind() {
    let comment_id = format!("0x{}", "c".repeat(64));
    let content = format!(
      "gm @{ADDR} and @Vitalik.eth, ask @dwr about ${ADDR} re {comment_id} https://quill.xyz/p?q=1."
    );
    assert_eq!(kinds(&content), vec![
      CandidateKind::Address(ADDR.to_ascii_lowercase()),
      CandidateKind::EnsName("vitalik.eth".into()),
      CandidateKind::Fname("dwr".into()),
      CandidateKind::Token(ADDR.to_ascii_lowercase()),
      CandidateKind::CommentId(comment_id),
      CandidateKind::Url("https://quill.xyz/p?q=1".into()),
    ]);
  }

  #[test]
  fn positions_cover_the_sigil() {
    let content = format!("hi @{ADDR}!");
    let candidates = extract_candidates(&content);
    assert_eq!(candidates[0].position, Position { start: 3, end: 3 + 1 + 42 });
    assert_eq!(&content[candidates[0].position.start..candidates[0].position.end], format!("@{ADDR}"));
  }

  #[test]
  fn short_hex_is_not_an_address() {
    assert_eq!(kinds("@0x1234 is short"), vec![CandidateKind::Fname("0x1234".into())]);
    assert!(kinds("plain text, no refs").is_empty());
  }

  #[test]
  fn email_addresses_are_not_mentions() {
    assert!(kinds("mail bob@example.com or bob@vitalik.eth").is_empty());
    assert!(kinds(&format!("ops@{ADDR} and pay{ADDR}")).is_empty());
    assert_eq!(kinds("(@dwr) and\n@v"), vec![
      CandidateKind::Fname("dwr".into()),
      CandidateKind::Fname("v".into()),
    ]);
  }

  #[test]
  fn status_follows_upstream_failures() {
    let resolved = || {
      Outcome::Resolved(Reference::Address {
        position: Position { start: 0, end: 1 },
        address:  "0x1".into(),
      })
    };
    let failed = || Outcome::Failed(ResolveError::Timeout);

    assert_eq!(summarize(vec![]).status, ResolutionStatus::Success);
    assert_eq!(
      summarize(vec![resolved(), Outcome::NotFound]).status,
      ResolutionStatus::Success
    );
    let partial = summarize(vec![resolved(), failed()]);
    assert_eq!(partial.status, ResolutionStatus::Partial);
    assert_eq!(partial.references.len(), 1);
    assert_eq!(summarize(vec![failed(), failed()]).status, ResolutionStatus::Failed);
  }
}
