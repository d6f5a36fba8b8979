//! Who is behind an address: the lookup the notification API uses to accept
//! ENS names as `user` and to decorate authors with profiles.

use std::{collections::HashMap, future::Future};

use quill_core::comment::{is_hex_address, normalize_address};
use serde::Serialize;

use crate::{
  ResolveError,
  cache::{Fetcher, Loaded, ResolverCache},
  ens::{EnsByAddress, EnsByName, EnsByQuery, EnsProfile},
  farcaster::{FarcasterByAddress, FarcasterProfile},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorProfile {
  pub address:   String,
  pub ens:       Option<EnsProfile>,
  pub farcaster: Option<FarcasterProfile>,
}

impl AuthorProfile {
  pub fn bare(address: impl Into<String>) -> Self {
    Self { address: address.into(), ens: None, farcaster: None }
  }
}

pub trait IdentityLookup: Send + Sync {
  /// Turn a user given as an address or ENS name into a lowercase address.
  /// `Ok(None)` when the name does not resolve.
  fn resolve_user<'a>(
    &'a self,
    user: &'a str,
  ) -> impl Future<Output = Result<Option<String>, ResolveError>> + Send + 'a;

  /// Profiles for `addresses`, keyed by lowercase address. Lookup failures
  /// degrade to a bare profile.
  fn profiles(
    &self,
    addresses: Vec<String>,
  ) -> impl Future<Output = HashMap<String, AuthorProfile>> + Send + '_;

  /// ENS names starting with `prefix`, for mention autocomplete.
  fn suggest<'a>(
    &'a self,
    prefix: &'a str,
  ) -> impl Future<Output = Result<Vec<EnsProfile>, ResolveError>> + Send + 'a;
}

/// [`IdentityLookup`] over the ENS and Farcaster caches. A page of
/// notifications costs one `load_many` per cache.
pub struct IdentityResolvers<
  A = EnsByAddress,
  N = EnsByName,
  F = FarcasterByAddress,
  Q = EnsByQuery,
> where
  A: Fetcher<Key = String, Value = EnsProfile>,
  N: Fetcher<Key = String, Value = EnsProfile>,
  F: Fetcher<Key = String, Value = FarcasterProfile>,
  Q: Fetcher<Key = String, Value = Vec<EnsProfile>>,
{
  ens_by_address:       ResolverCache<A>,
  ens_by_name:          ResolverCache<N>,
  farcaster_by_address: ResolverCache<F>,
  ens_by_query:         ResolverCache<Q>,
}

impl<A, N, F, Q> Clone for IdentityResolvers<A, N, F, Q>
where
  A: Fetcher<Key = String, Value = EnsProfile>,
  N: Fetcher<Key = String, Value = EnsProfile>,
  F: Fetcher<Key = String, Value = FarcasterProfile>,
  Q: Fetcher<Key = String, Value = Vec<EnsProfile>>,
{
  fn clone(&self) -> Self {
    Self {
      ens_by_address:       self.ens_by_address.clone(),
      ens_by_name:          self.ens_by_name.clone(),
      farcaster_by_address: self.farcaster_by_address.clone(),
      ens_by_query:         self.ens_by_query.clone(),
    }
  }
}

impl<A, N, F, Q> IdentityResolvers<A, N, F, Q>
where
  A: Fetcher<Key = String, Value = EnsProfile>,
  N: Fetcher<Key = String, Value = EnsProfile>,
  F: Fetcher<Key = String, Value = FarcasterProfile>,
  Q: Fetcher<Key = String, Value = Vec<EnsProfile>>,
{
  pub fn new(
    ens_by_address: ResolverCache<A>,
    ens_by_name: ResolverCache<N>,
    farcaster_by_address: ResolverCache<F>,
    ens_by_query: ResolverCache<Q>,
  ) -> Self {
    Self { ens_by_address, ens_by_name, farcaster_by_address, ens_by_query }
  }
}

fn or_log<V>(result: Loaded<V>, source: &'static str, address: &str) -> Option<V> {
  result.unwrap_or_else(|error| {
    tracing::debug!(source, address, %error, "profile lookup failed");
    None
  })
}

impl<A, N, F, Q> IdentityLookup for IdentityResolvers<A, N, F, Q>
where
  A: Fetcher<Key = String, Value = EnsProfile>,
  N: Fetcher<Key = String, Value = EnsProfile>,
  F: Fetcher<Key = String, Value = FarcasterProfile>,
  Q: Fetcher<Key = String, Value = Vec<EnsProfile>>,
{
  async fn resolve_user<'a>(&'a self, user: &'a str) -> Result<Option<String>, ResolveError> {
    let user = user.trim();
    if is_hex_address(user) {
      return Ok(Some(normalize_address(user)));
    }
    if !user.contains('.') {
      return Ok(None);
    }
    let profile = self.ens_by_name.load(user.to_ascii_lowercase()).await?;
    Ok(profile.map(|p| p.address))
  }

  async fn profiles(&self, addresses: Vec<String>) -> HashMap<String, AuthorProfile> {
    let mut unique: Vec<String> = addresses.iter().map(|a| normalize_address(a)).collect();
    unique.sort();
    unique.dedup();

    let (ens, farcaster) = tokio::join!(
      self.ens_by_address.load_many(unique.clone()),
      self.farcaster_by_address.load_many(unique.clone()),
    );

    unique
      .into_iter()
      .zip(ens.into_iter().zip(farcaster))
      .map(|(address, (ens, farcaster))| {
        let profile = AuthorProfile {
          ens: or_log(ens, "ens", &address),
          farcaster: or_log(farcaster, "farcaster", &address),
          address: address.clone(),
        };
        (address, profile)
      })
      .collect()
  }

  async fn suggest<'a>(&'a self, prefix: &'a str) -> Result<Vec<EnsProfile>, ResolveError> {
    let prefix = prefix.trim().to_ascii_lowercase();
    Ok(self.ens_by_query.load(prefix).await?.unwrap_or_default())
  }
}
