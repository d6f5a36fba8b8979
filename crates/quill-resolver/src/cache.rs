//! The resolver-cache framework.
//!
//! A [`ResolverCache`] wraps a [`Fetcher`] and adds:
//!
//! - single-flight loading: concurrent callers for a key share one in-flight
//!   fetch, which runs in its own task and completes even if every caller
//!   goes away;
//! - batching: uncached keys of a `load_many` call are fetched in batches of
//!   at most `max_batch_size`;
//! - separate TTLs for values and for not-found results;
//! - optional stale-while-revalidate.
//!
//! Errors are handed to everyone waiting on the failed fetch and then
//! forgotten, so the next load tries again.

use std::{
  collections::{HashMap, HashSet},
  fmt,
  future::Future,
  hash::Hash,
  panic::AssertUnwindSafe,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use futures::{
  FutureExt as _,
  future::{BoxFuture, Shared, join_all},
};
use tokio::time::Instant;
use tracing::Instrument as _;

use crate::ResolveError;

/// Outcome of a single key: a value, a definitive not-found, or an error.
pub type Loaded<V> = Result<Option<V>, ResolveError>;

/// Upstream access for one kind of lookup.
pub trait Fetcher: Send + Sync + 'static {
  type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
  type Value: Clone + Send + Sync + 'static;

  /// Short name used in spans and logs.
  fn name(&self) -> &'static str;

  /// Fetch `keys`, returning one result per key in the same order.
  fn fetch_many(
    &self,
    keys: Vec<Self::Key>,
  ) -> impl Future<Output = Vec<Loaded<Self::Value>>> + Send;

  /// Upper bound on one `fetch_many` call over `keys` keys. Fetchers that
  /// queue and retry internally widen `configured` to their own budget.
  fn timeout(&self, configured: Duration, _keys: usize) -> Duration { configured }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// How long a found value stays fresh.
  pub positive_ttl:   Duration,
  /// How long a not-found result stays fresh.
  pub negative_ttl:   Duration,
  /// Serve expired entries immediately and refresh them in the background.
  pub allow_stale:    bool,
  /// Upper bound on one `fetch_many` call, unless the fetcher asks for more.
  pub timeout:        Duration,
  pub max_batch_size: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      positive_ttl:   Duration::from_secs(60 * 60),
      negative_ttl:   Duration::from_secs(5 * 60),
      allow_stale:    false,
      timeout:        Duration::from_secs(5),
      max_batch_size: 50,
    }
  }
}

// ─── Slots ───────────────────────────────────────────────────────────────────

type InFlight<V> = Shared<BoxFuture<'static, Loaded<V>>>;

enum Slot<V> {
  Ready {
    value:      Option<V>,
    expires_at: Instant,
    refreshing: bool,
  },
  Pending(InFlight<V>),
}

struct Inner<F: Fetcher> {
  fetcher: F,
  config:  CacheConfig,
  slots:   Mutex<HashMap<F::Key, Slot<F::Value>>>,
}

impl<F: Fetcher> Inner<F> {
  fn slots(&self) -> MutexGuard<'_, HashMap<F::Key, Slot<F::Value>>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn ttl_for(&self, value: &Option<F::Value>) -> Duration {
    if value.is_some() {
      self.config.positive_ttl
    } else {
      self.config.negative_ttl
    }
  }

  /// Call the fetcher under the timeout. Always yields exactly one result
  /// per key, whatever the fetcher does.
  async fn fetch(&self, keys: &[F::Key]) -> Vec<Loaded<F::Value>> {
    let call = AssertUnwindSafe(self.fetcher.fetch_many(keys.to_vec())).catch_unwind();
    let all_failed =
      |e: ResolveError| -> Vec<Loaded<F::Value>> { keys.iter().map(|_| Err(e.clone())).collect() };

    let limit = self.fetcher.timeout(self.config.timeout, keys.len());
    match tokio::time::timeout(limit, call).await {
      Err(_) => all_failed(ResolveError::Timeout),
      Ok(Err(_panic)) => all_failed(ResolveError::Upstream(format!(
        "{} fetcher panicked",
        self.fetcher.name()
      ))),
      Ok(Ok(results)) if results.len() != keys.len() => {
        all_failed(ResolveError::Upstream(format!(
          "{} fetcher returned {} results for {} keys",
          self.fetcher.name(),
          results.len(),
          keys.len()
        )))
      }
      Ok(Ok(results)) => results,
    }
  }

  /// Write fetched results back: values and not-founds become fresh entries,
  /// errors drop the slot.
  fn store(&self, keys: &[F::Key], results: &[Loaded<F::Value>]) {
    let now = Instant::now();
    let mut slots = self.slots();
    for (key, result) in keys.iter().zip(results) {
      match result {
        Ok(value) => {
          slots.insert(key.clone(), Slot::Ready {
            value:      value.clone(),
            expires_at: now + self.ttl_for(value),
            refreshing: false,
          });
        }
        Err(_) => {
          slots.remove(key);
        }
      }
    }
  }

  /// A failed background refresh keeps serving the stale value and lets the
  /// next load try again.
  fn refresh_failed(&self, keys: &[F::Key], results: &[Loaded<F::Value>]) {
    let mut slots = self.slots();
    for (key, result) in keys.iter().zip(results) {
      if result.is_err() {
        if let Some(Slot::Ready { refreshing, .. }) = slots.get_mut(key) {
          *refreshing = false;
        }
      }
    }
  }
}

// ─── ResolverCache ───────────────────────────────────────────────────────────

/// A cache in front of one [`Fetcher`]. Cloning is cheap and clones share
/// state.
pub struct ResolverCache<F: Fetcher> {
  inner: Arc<Inner<F>>,
}

impl<F: Fetcher> Clone for ResolverCache<F> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

enum Plan<V> {
  Done(Loaded<V>),
  Wait(InFlight<V>),
}

impl<F: Fetcher> ResolverCache<F> {
  pub fn new(fetcher: F, config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner { fetcher, config, slots: Mutex::new(HashMap::new()) }),
    }
  }

  pub fn fetcher(&self) -> &F { &self.inner.fetcher }

  pub async fn load(&self, key: F::Key) -> Loaded<F::Value> {
    self
      .load_many(vec![key])
      .await
      .pop()
      .unwrap_or(Err(ResolveError::Upstream("empty load result".into())))
  }

  /// Load every key, in order. Duplicate keys are fetched once.
  pub async fn load_many(&self, keys: Vec<F::Key>) -> Vec<Loaded<F::Value>> {
    let plans = self.plan(&keys);
    join_all(plans.into_iter().map(|plan| async move {
      match plan {
        Plan::Done(result) => result,
        Plan::Wait(in_flight) => in_flight.await,
      }
    }))
    .await
  }

  /// Seed `key` with a value (or a not-found, for `None`) learned elsewhere.
  pub fn prime(&self, key: F::Key, value: Option<F::Value>) {
    let expires_at = Instant::now() + self.inner.ttl_for(&value);
    self.inner.slots().insert(key, Slot::Ready { value, expires_at, refreshing: false });
  }

  /// Forget `key`. An in-flight fetch for it still completes and writes back.
  pub fn clear(&self, key: &F::Key) { self.inner.slots().remove(key); }

  /// Decide, under one lock, what each key needs. Fetches for missing keys
  /// are started and registered before the lock is released, which is what
  /// makes loading single-flight.
  fn plan(&self, keys: &[F::Key]) -> Vec<Plan<F::Value>> {
    let now = Instant::now();
    let allow_stale = self.inner.config.allow_stale;
    let mut slots = self.inner.slots();

    let mut missing = Vec::new();
    let mut seen = HashSet::new();
    let mut stale = Vec::new();
    for key in keys {
      match slots.get_mut(key) {
        Some(Slot::Ready { expires_at, .. }) if *expires_at > now => {}
        Some(Slot::Ready { refreshing, .. }) if allow_stale => {
          if !*refreshing {
            *refreshing = true;
            stale.push(key.clone());
          }
        }
        Some(Slot::Pending(_)) => {}
        _ => {
          if seen.insert(key.clone()) {
            missing.push(key.clone());
          }
        }
      }
    }

    let batch_size = self.inner.config.max_batch_size.max(1);
    for chunk in missing.chunks(batch_size) {
      let batch = self.spawn_fetch(chunk.to_vec());
      for (i, key) in chunk.iter().enumerate() {
        let in_flight = batch
          .clone()
          .map(move |results| {
            results
              .get(i)
              .cloned()
              .unwrap_or_else(|| Err(ResolveError::Upstream("fetch task failed".into())))
          })
          .boxed()
          .shared();
        slots.insert(key.clone(), Slot::Pending(in_flight));
      }
    }
    for chunk in stale.chunks(batch_size) {
      self.spawn_refresh(chunk.to_vec());
    }

    keys
      .iter()
      .map(|key| match slots.get(key) {
        Some(Slot::Ready { value, .. }) => Plan::Done(Ok(value.clone())),
        Some(Slot::Pending(in_flight)) => Plan::Wait(in_flight.clone()),
        None => Plan::Done(Err(ResolveError::Upstream("cache slot vanished".into()))),
      })
      .collect()
  }

  fn spawn_fetch(&self, keys: Vec<F::Key>) -> Shared<BoxFuture<'static, Arc<Vec<Loaded<F::Value>>>>> {
    let inner = Arc::clone(&self.inner);
    let span = tracing::debug_span!("resolver.fetch", resolver = inner.fetcher.name(), keys = keys.len());
    let handle = tokio::spawn(
      async move {
        let results = inner.fetch(&keys).await;
        inner.store(&keys, &results);
        Arc::new(results)
      }
      .instrument(span),
    );
    async move {
      // The task catches fetcher panics itself; a join error means the
      // runtime is shutting down.
      handle
        .await
        .unwrap_or_else(|e| Arc::new(vec![Err(ResolveError::Upstream(e.to_string()))]))
    }
    .boxed()
    .shared()
  }

  fn spawn_refresh(&self, keys: Vec<F::Key>) {
    let inner = Arc::clone(&self.inner);
    let span = tracing::debug_span!("resolver.refresh", resolver = inner.fetcher.name(), keys = keys.len());
    tokio::spawn(
      async move {
        let results = inner.fetch(&keys).await;
        let (ok_keys, ok_results): (Vec<_>, Vec<_>) = keys
          .iter()
          .cloned()
          .zip(results.iter().cloned())
          .filter(|(_, r)| r.is_ok())
          .unzip();
        inner.store(&ok_keys, &ok_results);
        inner.refresh_failed(&keys, &results);
      }
      .instrument(span),
    );
  }
}
