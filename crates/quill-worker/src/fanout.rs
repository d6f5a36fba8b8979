//! The fan-out loop: drains the outbox into notifications.
//!
//! Each pass selects the oldest undispatched events, classifies them and
//! stores the derived notifications together with the dispatch mark. A
//! failing event is counted against its attempt budget and blocks later
//! events of the same aggregate for the rest of the pass, so per-aggregate
//! order holds. Delivery is at-least-once; notification uids make the
//! replays harmless.

use std::{collections::HashSet, sync::Arc, time::Duration};

use quill_core::{
  event::OutboxEvent,
  notification::NewNotification,
  report::ErrorReporter,
  store::{CommentStore, OutboxStore},
};
use tokio::sync::watch;
use tracing::Instrument as _;

use crate::{
  Error, Result,
  classify::classify,
  config::FanOutSettings,
  moderation::ModerationHook,
};

const COMPONENT: &str = "fanout";

/// Outcome of one pass over the outbox.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
  /// Events selected for this pass.
  pub selected:      usize,
  pub dispatched:    usize,
  pub failed:        usize,
  /// Left for a later pass behind a failed event of the same aggregate.
  pub deferred:      usize,
  /// Newly inserted notifications.
  pub notifications: usize,
}

pub struct FanOutWorker<S, M> {
  store:      Arc<S>,
  moderation: Option<M>,
  reporter:   Arc<dyn ErrorReporter>,
  settings:   FanOutSettings,
}

impl<S, M> FanOutWorker<S, M>
where
  S: CommentStore + OutboxStore,
  M: ModerationHook,
{
  pub fn new(
    store: Arc<S>,
    moderation: Option<M>,
    reporter: Arc<dyn ErrorReporter>,
    settings: FanOutSettings,
  ) -> Self {
    Self { store, moderation, reporter, settings }
  }

  /// Poll until `shutdown` flips to `true`. The pass in progress always
  /// completes.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
      batch_size = self.settings.batch_size,
      poll_interval_ms = self.settings.poll_interval_ms,
      "fan-out worker started"
    );
    while !*shutdown.borrow() {
      let idle = match self.run_batch().await {
        Ok(report) => {
          if report.selected > 0 {
            tracing::info!(
              dispatched = report.dispatched,
              failed = report.failed,
              deferred = report.deferred,
              notifications = report.notifications,
              "fan-out pass complete"
            );
          }
          report.dispatched == 0 || report.selected < self.settings.batch_size
        }
        Err(e) => {
          self.reporter.report(COMPONENT, &e, &[]);
          true
        }
      };
      if idle {
        sleep_or_shutdown(self.settings.poll_interval(), &mut shutdown).await;
      }
    }
    tracing::info!("fan-out worker stopped");
  }

  /// One pass over at most `batch_size` pending events. Only a failure to
  /// select events is returned; per-event errors are reported.
  pub async fn run_batch(&self) -> Result<BatchReport> {
    let events = self
      .store
      .pending_events(self.settings.batch_size)
      .await
      .map_err(Error::store)?;

    let mut report = BatchReport { selected: events.len(), ..Default::default() };
    let mut blocked: HashSet<(String, String)> = HashSet::new();

    for event in &events {
      let aggregate = (event.aggregate_type.clone(), event.aggregate_id.clone());
      if blocked.contains(&aggregate) {
        report.deferred += 1;
        continue;
      }

      let span = tracing::info_span!(
        "dispatch",
        event_id = event.id,
        event_type = %event.event_type,
        aggregate_id = %event.aggregate_id,
      );
      match self.dispatch(event).instrument(span).await {
        Ok(inserted) => {
          report.dispatched += 1;
          report.notifications += inserted;
        }
        Err(e) => {
          report.failed += 1;
          blocked.insert(aggregate);
          if let Err(bookkeeping) = self.record_failure(event, &e).await {
            self.reporter.report(COMPONENT, &bookkeeping, &[("eventId", event.id.to_string())]);
          }
        }
      }
    }
    Ok(report)
  }

  async fn dispatch(&self, event: &OutboxEvent) -> Result<usize> {
    let Some(decoded) = event.decode()? else {
      tracing::debug!("ignoring unknown event type");
      return self.complete(event, Vec::new()).await;
    };

    let classification = classify(self.store.as_ref(), &decoded, self.settings.reply_depth_limit)
      .await
      .map_err(Error::store)?;

    for skipped in &classification.skipped {
      self.reporter.report(COMPONENT, skipped, &[
        ("eventId", event.id.to_string()),
        ("commentId", skipped.comment_id().to_owned()),
      ]);
    }

    if let (Some(request), Some(hook)) = (&classification.moderate, &self.moderation) {
      hook.request_review(request).await?;
    }

    self.complete(event, classification.notifications).await
  }

  async fn complete(
    &self,
    event: &OutboxEvent,
    notifications: Vec<NewNotification>,
  ) -> Result<usize> {
    self
      .store
      .complete_event(event.id, notifications)
      .await
      .map_err(Error::store)
  }

  async fn record_failure(&self, event: &OutboxEvent, error: &Error) -> Result<()> {
    self.reporter.report(COMPONENT, error, &[
      ("eventId", event.id.to_string()),
      ("commentId", event.aggregate_id.clone()),
      ("attempt", (event.attempts + 1).to_string()),
    ]);
    let flagged = self
      .store
      .record_dispatch_failure(event.id, error.to_string(), self.settings.max_attempts)
      .await
      .map_err(Error::store)?;
    if flagged {
      tracing::warn!(
        event_id = event.id,
        attempts = event.attempts + 1,
        "event flagged for manual inspection"
      );
    }
    Ok(())
  }
}

async fn sleep_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) {
  let sleep = tokio::time::sleep(period);
  tokio::pin!(sleep);
  tokio::select! {
    _ = &mut sleep => {}
    changed = shutdown.changed() => {
      // Sender dropped; finish the sleep.
      if changed.is_err() {
        sleep.await;
      }
    }
  }
}
