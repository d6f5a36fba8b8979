//! ERC-20 token metadata, fetched through a [`RateLimitedQueue`] because the
//! token-info API enforces a strict request budget.

use std::time::Duration;

use futures::future::join_all;
use quill_core::comment::normalize_address;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
  ResolveError,
  cache::{Fetcher, Loaded},
  http::send_json,
  queue::{QueueError, RateLimitedQueue},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
  pub chain_id: u64,
  /// Lowercase contract address.
  pub address:  String,
}

impl TokenKey {
  pub fn new(chain_id: u64, address: &str) -> Self {
    Self { chain_id, address: normalize_address(address) }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
  pub address:  String,
  pub chain_id: u64,
  pub symbol:   String,
  pub name:     String,
  pub decimals: u8,
  pub logo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
  #[serde(default)]
  tokens: Vec<TokenEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenEntry {
  chain_id: u64,
  symbol:   Option<String>,
  name:     Option<String>,
  decimals: Option<u8>,
  logo:     Option<String>,
}

impl TokenInfoResponse {
  fn into_info(self, key: &TokenKey) -> Option<TokenInfo> {
    let entry = self.tokens.into_iter().find(|t| t.chain_id == key.chain_id)?;
    Some(TokenInfo {
      address:  key.address.clone(),
      chain_id: key.chain_id,
      symbol:   entry.symbol?,
      name:     entry.name?,
      decimals: entry.decimals?,
      logo_url: entry.logo,
    })
  }
}

#[derive(Clone)]
pub struct Erc20Fetcher {
  client:   Client,
  base_url: String,
  api_key:  String,
  queue:    RateLimitedQueue,
}

impl Erc20Fetcher {
  pub fn new(
    client: Client,
    base_url: impl Into<String>,
    api_key: impl Into<String>,
    queue: RateLimitedQueue,
  ) -> Self {
    Self { client, base_url: base_url.into(), api_key: api_key.into(), queue }
  }

  async fn token_info(&self, key: &TokenKey) -> Loaded<TokenInfo> {
    let url = format!(
      "{}/v1/evm/token-info/{}",
      self.base_url.trim_end_matches('/'),
      key.address
    );
    let response = self
      .queue
      .run(|| {
        let req = self
          .client
          .get(&url)
          .header("X-Sim-Api-Key", &self.api_key)
          .query(&[("chain_ids", key.chain_id.to_string())]);
        async move { send_json::<TokenInfoResponse>(req).await.map_err(QueueError::from) }
      })
      .await
      .map_err(ResolveError::from)?;
    Ok(response.and_then(|r| r.into_info(key)))
  }
}

impl Fetcher for Erc20Fetcher {
  type Key = TokenKey;
  type Value = TokenInfo;

  fn name(&self) -> &'static str { "erc20" }

  fn timeout(&self, configured: Duration, keys: usize) -> Duration {
    configured.max(self.queue.config().budget(keys))
  }

  async fn fetch_many(&self, keys: Vec<TokenKey>) -> Vec<Loaded<TokenInfo>> {
    join_all(keys.iter().map(|key| self.token_info(key))).await
  }
}
