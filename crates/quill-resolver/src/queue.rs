//! A work queue that respects an upstream's rate limit.
//!
//! At most `concurrency` tasks run at once and at most
//! `requests_per_interval` start within any `interval`. A task that reports
//! [`QueueError::RateLimited`] gives up its slot, waits out `Retry-After`
//! (capped at `max_retry_after`) and is queued again, so other work keeps
//! flowing meanwhile. Each attempt is bounded by `attempt_timeout`, which
//! makes the whole run bounded by [`QueueConfig::budget`].

use std::{
  collections::VecDeque,
  future::Future,
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tokio::{sync::Semaphore, time::Instant};

use crate::ResolveError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
  /// Returned by a task when the upstream answered 429.
  #[error("rate limited")]
  RateLimited { retry_after: Option<Duration> },

  #[error("still rate limited after {attempts} attempts")]
  RetriesExhausted { attempts: u32 },

  #[error(transparent)]
  Task(ResolveError),

  #[error("queue closed")]
  Closed,
}

impl From<ResolveError> for QueueError {
  fn from(e: ResolveError) -> Self {
    match e {
      ResolveError::RateLimited { retry_after } => Self::RateLimited { retry_after },
      other => Self::Task(other),
    }
  }
}

impl From<QueueError> for ResolveError {
  fn from(e: QueueError) -> Self {
    match e {
      QueueError::RateLimited { retry_after } => Self::RateLimited { retry_after },
      QueueError::RetriesExhausted { .. } => Self::RateLimited { retry_after: None },
      QueueError::Task(inner) => inner,
      QueueError::Closed => Self::Upstream("request queue closed".into()),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub concurrency:           usize,
  pub requests_per_interval: usize,
  #[serde(with = "millis")]
  pub interval:              Duration,
  /// Re-queues after the first attempt before giving up.
  pub max_retries:           u32,
  /// Wait applied when a 429 carries no usable `Retry-After`.
  #[serde(with = "millis")]
  pub default_retry_after:   Duration,
  /// Longest `Retry-After` honoured; longer ones are cut to this.
  #[serde(with = "millis")]
  pub max_retry_after:       Duration,
  /// Upper bound on a single attempt of a task.
  #[serde(with = "millis")]
  pub attempt_timeout:       Duration,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      concurrency:           4,
      requests_per_interval: 10,
      interval:              Duration::from_secs(1),
      max_retries:           3,
      default_retry_after:   Duration::from_secs(1),
      max_retry_after:       Duration::from_secs(30),
      attempt_timeout:       Duration::from_secs(5),
    }
  }
}

impl QueueConfig {
  /// Longest `tasks` concurrent runs can take: every attempt times out and
  /// every retry waits the longest allowed `Retry-After`, behind the rate
  /// window for all those attempts.
  pub fn budget(&self, tasks: usize) -> Duration {
    let attempts = self.max_retries.saturating_add(1);
    let per_task = self
      .attempt_timeout
      .saturating_mul(attempts)
      .saturating_add(self.max_retry_after.saturating_mul(self.max_retries));
    let rounds = tasks.div_ceil(self.concurrency.max(1));
    let windows = tasks
      .saturating_mul(attempts as usize)
      .div_ceil(self.requests_per_interval.max(1));
    per_task
      .saturating_mul(clamp_u32(rounds))
      .saturating_add(self.interval.saturating_mul(clamp_u32(windows)))
  }

  fn retry_wait(&self, retry_after: Option<Duration>) -> Duration {
    retry_after
      .unwrap_or(self.default_retry_after)
      .min(self.max_retry_after)
  }
}

fn clamp_u32(n: usize) -> u32 { u32::try_from(n).unwrap_or(u32::MAX) }

mod millis {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer};

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
  }
}

struct Inner {
  config:  QueueConfig,
  permits: Semaphore,
  /// Start times of the requests inside the current window.
  window:  Mutex<VecDeque<Instant>>,
}

#[derive(Clone)]
pub struct RateLimitedQueue {
  inner: Arc<Inner>,
}

impl RateLimitedQueue {
  pub fn new(config: QueueConfig) -> Self {
    let permits = Semaphore::new(config.concurrency.max(1));
    Self {
      inner: Arc::new(Inner { config, permits, window: Mutex::new(VecDeque::new()) }),
    }
  }

  pub fn config(&self) -> &QueueConfig { &self.inner.config }

  /// Run `task` through the queue, re-running it after each 429 until it
  /// succeeds, fails otherwise, or `max_retries` is used up. An attempt that
  /// outlives `attempt_timeout` fails with [`ResolveError::Timeout`].
  pub async fn run<T, Fut>(&self, mut task: impl FnMut() -> Fut) -> Result<T, QueueError>
  where
    Fut: Future<Output = Result<T, QueueError>>,
  {
    let mut attempts = 0;
    loop {
      attempts += 1;
      let outcome = {
        let _permit = self.inner.permits.acquire().await.map_err(|_| QueueError::Closed)?;
        self.wait_for_window().await;
        tokio::time::timeout(self.inner.config.attempt_timeout, task())
          .await
          .unwrap_or(Err(QueueError::Task(ResolveError::Timeout)))
      };

      match outcome {
        Err(QueueError::RateLimited { retry_after }) => {
          if attempts > self.inner.config.max_retries {
            return Err(QueueError::RetriesExhausted { attempts });
          }
          let wait = self.inner.config.retry_wait(retry_after);
          tracing::debug!(attempts, wait_ms = wait.as_millis() as u64, "rate limited, requeueing");
          tokio::time::sleep(wait).await;
        }
        other => return other,
      }
    }
  }

  /// Block until starting one more request keeps the window under its limit,
  /// then record the start.
  async fn wait_for_window(&self) {
    let limit = self.inner.config.requests_per_interval.max(1);
    let interval = self.inner.config.interval;
    loop {
      let wake_at = {
        let mut window = self.inner.window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        while window.front().is_some_and(|start| *start + interval <= now) {
          window.pop_front();
        }
        if window.len() < limit {
          window.push_back(now);
          return;
        }
        match window.front() {
          Some(oldest) => *oldest + interval,
          None => return,
        }
      };
      tokio::time::sleep_until(wake_at).await;
    }
  }
}
