//! Resolver configuration and the one place the caches are constructed.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::{
  cache::{CacheConfig, ResolverCache},
  ens::{EnsByAddress, EnsByName, EnsByQuery},
  erc20::Erc20Fetcher,
  farcaster::{FarcasterByAddress, FarcasterByName},
  identity::IdentityResolvers,
  queue::{QueueConfig, RateLimitedQueue},
  references::CommentReferenceResolver,
  url::UrlFetcher,
};

/// TTLs in seconds, timeouts in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  pub positive_ttl_secs: u64,
  pub negative_ttl_secs: u64,
  pub allow_stale:       bool,
  pub timeout_ms:        u64,
  pub max_batch_size:    usize,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      positive_ttl_secs: 24 * 60 * 60,
      negative_ttl_secs: 5 * 60,
      allow_stale:       true,
      timeout_ms:        5_000,
      max_batch_size:    50,
    }
  }
}

impl CacheSettings {
  pub fn to_config(&self) -> CacheConfig {
    CacheConfig {
      positive_ttl:   Duration::from_secs(self.positive_ttl_secs),
      negative_ttl:   Duration::from_secs(self.negative_ttl_secs),
      allow_stale:    self.allow_stale,
      timeout:        Duration::from_millis(self.timeout_ms),
      max_batch_size: self.max_batch_size,
    }
  }
}

/// Per-resolver adjustments on top of the shared [`CacheSettings`]; unset
/// fields inherit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheOverrides {
  pub positive_ttl_secs: Option<u64>,
  pub negative_ttl_secs: Option<u64>,
  pub allow_stale:       Option<bool>,
  pub timeout_ms:        Option<u64>,
  pub max_batch_size:    Option<usize>,
}

impl CacheOverrides {
  pub fn apply(&self, base: &CacheSettings) -> CacheSettings {
    CacheSettings {
      positive_ttl_secs: self.positive_ttl_secs.unwrap_or(base.positive_ttl_secs),
      negative_ttl_secs: self.negative_ttl_secs.unwrap_or(base.negative_ttl_secs),
      allow_stale:       self.allow_stale.unwrap_or(base.allow_stale),
      timeout_ms:        self.timeout_ms.unwrap_or(base.timeout_ms),
      max_batch_size:    self.max_batch_size.unwrap_or(base.max_batch_size),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
  pub ens_data_url:       String,
  pub ens_subgraph_url:   String,
  pub neynar_url:         String,
  pub neynar_api_key:     String,
  pub token_info_url:     String,
  pub token_info_api_key: String,
  /// Client-level timeout for every upstream request. Kept below the cache
  /// and queue attempt timeouts so a slow upstream surfaces as its own error.
  pub http_timeout_ms:    u64,
  pub ens_query_limit:    usize,
  /// Shared by every cache unless overridden below.
  pub cache:              CacheSettings,
  pub ens_cache:          CacheOverrides,
  pub farcaster_cache:    CacheOverrides,
  pub token_cache:        CacheOverrides,
  pub url_cache:          CacheOverrides,
  /// Budget of the token-info API.
  pub token_queue:        QueueConfig,
}

impl Default for ResolverSettings {
  fn default() -> Self {
    Self {
      ens_data_url:       "https://api.ensdata.net".into(),
      ens_subgraph_url:   "https://api.thegraph.com/subgraphs/name/ensdomains/ens".into(),
      neynar_url:         "https://api.neynar.com".into(),
      neynar_api_key:     String::new(),
      token_info_url:     "https://api.sim.dune.com".into(),
      token_info_api_key: String::new(),
      http_timeout_ms:    4_000,
      ens_query_limit:    10,
      cache:              CacheSettings::default(),
      ens_cache:          CacheOverrides::default(),
      farcaster_cache:    CacheOverrides::default(),
      // Token metadata rarely changes.
      token_cache:        CacheOverrides {
        positive_ttl_secs: Some(7 * 24 * 60 * 60),
        ..Default::default()
      },
      url_cache:          CacheOverrides {
        positive_ttl_secs: Some(60 * 60),
        ..Default::default()
      },
      token_queue:        QueueConfig::default(),
    }
  }
}

impl ResolverSettings {
  fn ens_config(&self) -> CacheConfig { self.ens_cache.apply(&self.cache).to_config() }

  fn farcaster_config(&self) -> CacheConfig {
    let config = self.farcaster_cache.apply(&self.cache).to_config();
    CacheConfig { max_batch_size: config.max_batch_size.min(NEYNAR_MAX_BULK), ..config }
  }
}

/// Every resolver cache, built once at startup and shared by clone.
#[derive(Clone)]
pub struct Resolvers {
  pub ens_by_address:       ResolverCache<EnsByAddress>,
  pub ens_by_name:          ResolverCache<EnsByName>,
  pub ens_by_query:         ResolverCache<EnsByQuery>,
  pub farcaster_by_address: ResolverCache<FarcasterByAddress>,
  pub farcaster_by_name:    ResolverCache<FarcasterByName>,
  pub erc20:                ResolverCache<Erc20Fetcher>,
  pub url:                  ResolverCache<UrlFetcher>,
}

/// Neynar accepts at most this many addresses per bulk request.
const NEYNAR_MAX_BULK: usize = 350;

impl Resolvers {
  pub fn build(settings: &ResolverSettings) -> Result<Self, reqwest::Error> {
    let client = Client::builder()
      .timeout(Duration::from_millis(settings.http_timeout_ms))
      .user_agent(concat!("quill/", env!("CARGO_PKG_VERSION")))
      .build()?;
    let ens_config = settings.ens_config();
    let farcaster_config = settings.farcaster_config();
    let queue = RateLimitedQueue::new(settings.token_queue.clone());

    Ok(Self {
      ens_by_address:       ResolverCache::new(
        EnsByAddress::new(client.clone(), &settings.ens_data_url),
        ens_config.clone(),
      ),
      ens_by_name:          ResolverCache::new(
        EnsByName::new(client.clone(), &settings.ens_data_url),
        ens_config.clone(),
      ),
      ens_by_query:         ResolverCache::new(
        EnsByQuery::new(client.clone(), &settings.ens_subgraph_url, settings.ens_query_limit),
        ens_config,
      ),
      farcaster_by_address: ResolverCache::new(
        FarcasterByAddress::new(client.clone(), &settings.neynar_url, &settings.neynar_api_key),
        farcaster_config.clone(),
      ),
      farcaster_by_name:    ResolverCache::new(
        FarcasterByName::new(client.clone(), &settings.neynar_url, &settings.neynar_api_key),
        farcaster_config,
      ),
      erc20:                ResolverCache::new(
        Erc20Fetcher::new(
          client.clone(),
          &settings.token_info_url,
          &settings.token_info_api_key,
          queue,
        ),
        settings.token_cache.apply(&settings.cache).to_config(),
      ),
      url:                  ResolverCache::new(
        UrlFetcher::new(client),
        settings.url_cache.apply(&settings.cache).to_config(),
      ),
    })
  }

  pub fn identity(&self) -> IdentityResolvers {
    IdentityResolvers::new(
      self.ens_by_address.clone(),
      self.ens_by_name.clone(),
      self.farcaster_by_address.clone(),
      self.ens_by_query.clone(),
    )
  }

  pub fn references(&self) -> CommentReferenceResolver {
    CommentReferenceResolver {
      ens_by_address:       self.ens_by_address.clone(),
      ens_by_name:          self.ens_by_name.clone(),
      farcaster_by_address: self.farcaster_by_address.clone(),
      farcaster_by_name:    self.farcaster_by_name.clone(),
      erc20:                self.erc20.clone(),
      url:                  self.url.clone(),
    }
  }
}
