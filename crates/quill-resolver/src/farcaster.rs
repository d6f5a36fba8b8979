//! Farcaster lookups through the Neynar API.

use std::collections::HashMap;

use futures::future::join_all;
use quill_core::comment::normalize_address;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
  cache::{Fetcher, Loaded},
  http::send_json,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarcasterProfile {
  pub fid:          u64,
  pub username:     String,
  pub display_name: Option<String>,
  pub pfp_url:      Option<String>,
  /// The verified (or custody) address the profile was matched on.
  pub address:      String,
}

#[derive(Debug, Deserialize)]
struct NeynarUser {
  fid:                u64,
  username:           String,
  display_name:       Option<String>,
  pfp_url:            Option<String>,
  custody_address:    Option<String>,
  #[serde(default)]
  verified_addresses: VerifiedAddresses,
}

#[derive(Debug, Default, Deserialize)]
struct VerifiedAddresses {
  #[serde(default)]
  eth_addresses: Vec<String>,
}

impl NeynarUser {
  fn into_profile(self, address: Option<String>) -> Option<FarcasterProfile> {
    let address = address
      .or_else(|| self.verified_addresses.eth_addresses.first().cloned())
      .or(self.custody_address)?;
    Some(FarcasterProfile {
      fid:          self.fid,
      username:     self.username,
      display_name: self.display_name,
      pfp_url:      self.pfp_url,
      address:      normalize_address(&address),
    })
  }
}

fn neynar_get(client: &Client, base_url: &str, path: &str, api_key: &str) -> reqwest::RequestBuilder {
  client
    .get(format!("{}{path}", base_url.trim_end_matches('/')))
    .header("x-api-key", api_key)
}

// ─── By address ──────────────────────────────────────────────────────────────

/// Keyed by lowercase address; batched through `bulk-by-address`.
#[derive(Clone)]
pub struct FarcasterByAddress {
  client:   Client,
  base_url: String,
  api_key:  String,
}

impl FarcasterByAddress {
  pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
    Self { client, base_url: base_url.into(), api_key: api_key.into() }
  }
}

impl Fetcher for FarcasterByAddress {
  type Key = String;
  type Value = FarcasterProfile;

  fn name(&self) -> &'static str { "farcaster-by-address" }

  async fn fetch_many(&self, keys: Vec<String>) -> Vec<Loaded<FarcasterProfile>> {
    let req = neynar_get(
      &self.client,
      &self.base_url,
      "/v2/farcaster/user/bulk-by-address",
      &self.api_key,
    )
    .query(&[("addresses", keys.join(","))]);

    // The response maps each matched address to the users verified on it;
    // unmatched addresses are simply absent, and a batch with no match at
    // all comes back 404.
    match send_json::<HashMap<String, Vec<NeynarUser>>>(req).await {
      Ok(found) => {
        let mut found: HashMap<String, Vec<NeynarUser>> = found
          .unwrap_or_default()
          .into_iter()
          .map(|(address, users)| (normalize_address(&address), users))
          .collect();
        keys
          .iter()
          .map(|key| {
            let user = found.remove(&normalize_address(key)).and_then(|u| u.into_iter().next());
            Ok(user.and_then(|u| u.into_profile(Some(key.clone()))))
          })
          .collect()
      }
      Err(e) => keys.iter().map(|_| Err(e.clone())).collect(),
    }
  }
}

// ─── By name ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UserEnvelope {
  user: NeynarUser,
}

/// Keyed by lowercase fname.
#[derive(Clone)]
pub struct FarcasterByName {
  client:   Client,
  base_url: String,
  api_key:  String,
}

impl FarcasterByName {
  pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
    Self { client, base_url: base_url.into(), api_key: api_key.into() }
  }

  async fn by_username(&self, username: &str) -> Loaded<FarcasterProfile> {
    let req = neynar_get(
      &self.client,
      &self.base_url,
      "/v2/farcaster/user/by_username",
      &self.api_key,
    )
    .query(&[("username", username)]);
    let envelope = send_json::<UserEnvelope>(req).await?;
    Ok(envelope.and_then(|e| e.user.into_profile(None)))
  }
}

impl Fetcher for FarcasterByName {
  type Key = String;
  type Value = FarcasterProfile;

  fn name(&self) -> &'static str { "farcaster-by-name" }

  async fn fetch_many(&self, keys: Vec<String>) -> Vec<Loaded<FarcasterProfile>> {
    join_all(keys.iter().map(|name| self.by_username(name))).await
  }
}
