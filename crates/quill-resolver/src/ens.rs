//! ENS lookups: by address (reverse record), by name (forward record) and by
//! name prefix for autocomplete.
//!
//! Single lookups go to an ENS data API (`GET {base}/{address|name}`); the
//! prefix search queries the ENS subgraph over GraphQL.

use futures::future::join_all;
use quill_core::comment::normalize_address;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
  ResolveError,
  cache::{Fetcher, Loaded},
  http::send_json,
};

/// A name with the address it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsProfile {
  pub address:    String,
  pub name:       String,
  pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnsDataRecord {
  address:    Option<String>,
  ens:        Option<String>,
  avatar_url: Option<String>,
  avatar:     Option<String>,
}

impl EnsDataRecord {
  fn into_profile(self) -> Option<EnsProfile> {
    Some(EnsProfile {
      address:    normalize_address(&self.address?),
      name:       self.ens.filter(|n| !n.is_empty())?,
      avatar_url: self.avatar_url.or(self.avatar),
    })
  }
}

async fn fetch_record(client: &Client, base_url: &str, key: &str) -> Loaded<EnsProfile> {
  let url = format!("{}/{key}", base_url.trim_end_matches('/'));
  let record = send_json::<EnsDataRecord>(client.get(url)).await?;
  Ok(record.and_then(EnsDataRecord::into_profile))
}

// ─── By address ──────────────────────────────────────────────────────────────

/// Keyed by lowercase address. `None` when the address has no primary name.
#[derive(Clone)]
pub struct EnsByAddress {
  client:   Client,
  base_url: String,
}

impl EnsByAddress {
  pub fn new(client: Client, base_url: impl Into<String>) -> Self {
    Self { client, base_url: base_url.into() }
  }
}

impl Fetcher for EnsByAddress {
  type Key = String;
  type Value = EnsProfile;

  fn name(&self) -> &'static str { "ens-by-address" }

  async fn fetch_many(&self, keys: Vec<String>) -> Vec<Loaded<EnsProfile>> {
    join_all(keys.iter().map(|address| async move {
      let profile = fetch_record(&self.client, &self.base_url, address).await?;
      // A reverse record must point back at the address asked about.
      Ok(profile.filter(|p| p.address == normalize_address(address)))
    }))
    .await
  }
}

// ─── By name ─────────────────────────────────────────────────────────────────

/// Keyed by lowercase ENS name.
#[derive(Clone)]
pub struct EnsByName {
  client:   Client,
  base_url: String,
}

impl EnsByName {
  pub fn new(client: Client, base_url: impl Into<String>) -> Self {
    Self { client, base_url: base_url.into() }
  }
}

impl Fetcher for EnsByName {
  type Key = String;
  type Value = EnsProfile;

  fn name(&self) -> &'static str { "ens-by-name" }

  async fn fetch_many(&self, keys: Vec<String>) -> Vec<Loaded<EnsProfile>> {
    join_all(
      keys
        .iter()
        .map(|name| fetch_record(&self.client, &self.base_url, name)),
    )
    .await
  }
}

// ─── By query ────────────────────────────────────────────────────────────────

const DOMAINS_BY_PREFIX: &str = "query DomainsByPrefix($prefix: String!, $first: Int!) {
  domains(
    where: { name_starts_with: $prefix, resolvedAddress_not: null }
    first: $first
    orderBy: name
  ) {
    name
    resolvedAddress { id }
  }
}";

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
  data:   Option<T>,
  #[serde(default)]
  errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
  message: String,
}

#[derive(Debug, Deserialize)]
struct DomainsData {
  domains: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Domain {
  name:             Option<String>,
  resolved_address: Option<ResolvedAddress>,
}

#[derive(Debug, Deserialize)]
struct ResolvedAddress {
  id: String,
}

/// Keyed by lowercase name prefix; yields up to `limit` matching names.
/// `None` when nothing matches.
#[derive(Clone)]
pub struct EnsByQuery {
  client:       Client,
  subgraph_url: String,
  limit:        usize,
}

impl EnsByQuery {
  pub fn new(client: Client, subgraph_url: impl Into<String>, limit: usize) -> Self {
    Self { client, subgraph_url: subgraph_url.into(), limit }
  }

  async fn search(&self, prefix: &str) -> Loaded<Vec<EnsProfile>> {
    let body = json!({
      "query": DOMAINS_BY_PREFIX,
      "variables": { "prefix": prefix, "first": self.limit },
    });
    let Some(resp) = send_json::<GraphQlResponse<DomainsData>>(
      self.client.post(&self.subgraph_url).json(&body),
    )
    .await?
    else {
      return Ok(None);
    };

    if let Some(err) = resp.errors.first() {
      return Err(ResolveError::Upstream(format!("subgraph: {}", err.message)));
    }
    let profiles: Vec<EnsProfile> = resp
      .data
      .map(|d| d.domains)
      .unwrap_or_default()
      .into_iter()
      .filter_map(|d| {
        Some(EnsProfile {
          address:    normalize_address(&d.resolved_address?.id),
          name:       d.name?,
          avatar_url: None,
        })
      })
      .collect();
    Ok((!profiles.is_empty()).then_some(profiles))
  }
}

impl Fetcher for EnsByQuery {
  type Key = String;
  type Value = Vec<EnsProfile>;

  fn name(&self) -> &'static str { "ens-by-query" }

  async fn fetch_many(&self, keys: Vec<String>) -> Vec<Loaded<Vec<EnsProfile>>> {
    join_all(keys.iter().map(|prefix| self.search(prefix))).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_without_primary_name_is_not_found() {
    let record: EnsDataRecord = serde_json::from_value(json!({
      "address": "0xABC",
      "ens": "",
    }))
    .unwrap();
    assert_eq!(record.into_profile(), None);
  }

  #[test]
  fn record_falls_back_to_plain_avatar() {
    let record: EnsDataRecord = serde_json::from_value(json!({
      "address": "0xABC",
      "ens": "alice.eth",
      "avatar": "https://img/alice.png",
      "ens_primary": "alice.eth",
    }))
    .unwrap();
    assert_eq!(
      record.into_profile(),
      Some(EnsProfile {
        address:    "0xabc".into(),
        name:       "alice.eth".into(),
        avatar_url: Some("https://img/alice.png".into()),
      })
    );
  }
}
