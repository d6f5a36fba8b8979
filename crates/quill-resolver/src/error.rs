//! Error type shared by every resolver.

use std::time::Duration;

use thiserror::Error;

/// Why a lookup produced no answer. Not-found is *not* an error: fetchers
/// return `Ok(None)` for it and the cache stores it negatively.
///
/// `Clone` because one failed in-flight fetch is handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
  #[error("upstream error: {0}")]
  Upstream(String),

  #[error("could not decode upstream response: {0}")]
  Decode(String),

  #[error("upstream timed out")]
  Timeout,

  #[error("rate limited by upstream")]
  RateLimited { retry_after: Option<Duration> },
}

impl From<reqwest::Error> for ResolveError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else if e.is_decode() {
      Self::Decode(e.to_string())
    } else {
      Self::Upstream(e.to_string())
    }
  }
}
