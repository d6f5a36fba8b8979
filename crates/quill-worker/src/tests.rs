//! Worker tests against an in-memory SQLite store with fake collaborators.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use chrono::Utc;
use quill_core::{
  comment::NewComment,
  cursor::PageRequest,
  moderation::ModerationStatus,
  notification::{Notification, NotificationFilter, NotificationQuery, NotificationType},
  reference::{Position, Reference, ReferenceResolution, ResolutionStatus},
  report::ErrorReporter,
  store::{CommentEdit, CommentStore, NotificationStore, OutboxStore, ReferenceResultStore},
};
use quill_resolver::references::ReferenceResolver;
use quill_store_sqlite::SqliteStore;

use crate::{
  Error, Result,
  classify::classify,
  config::FanOutSettings,
  fanout::{BatchReport, FanOutWorker},
  moderation::{ModerationHook, ReviewRequest},
  refresher::{RefreshOptions, RefreshReport, Refresher},
};

const CHAIN: u64 = 8453;
const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const BOB: &str = "0x00000000000000000000000000000000000000b2";
const CAROL: &str = "0x00000000000000000000000000000000000000c3";
const APP: &str = "0x00000000000000000000000000000000000000ff";

// ─── Fakes ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingReporter {
  reports: Mutex<Vec<(&'static str, String, Vec<(&'static str, String)>)>>,
}

impl ErrorReporter for RecordingReporter {
  fn report(
    &self,
    component: &'static str,
    error: &(dyn std::error::Error + 'static),
    tags: &[(&'static str, String)],
  ) {
    self
      .reports
      .lock()
      .unwrap()
      .push((component, error.to_string(), tags.to_vec()));
  }
}

#[derive(Default)]
struct FakeHook {
  fail:      AtomicBool,
  /// `(comment id, thread root)` per review request.
  requested: Mutex<Vec<(String, Option<String>)>>,
}

impl ModerationHook for FakeHook {
  async fn request_review<'a>(&'a self, request: &'a ReviewRequest) -> Result<()> {
    if self.fail.load(Ordering::SeqCst) {
      return Err(Error::ModerationStatus(503));
    }
    self
      .requested
      .lock()
      .unwrap()
      .push((request.comment.id.clone(), request.root_id.clone()));
    Ok(())
  }
}

impl ModerationHook for Arc<FakeHook> {
  async fn request_review<'a>(&'a self, request: &'a ReviewRequest) -> Result<()> {
    self.as_ref().request_review(request).await
  }
}

fn settings() -> FanOutSettings {
  FanOutSettings { poll_interval_ms: 10, batch_size: 50, max_attempts: 3, reply_depth_limit: 5 }
}

struct Harness {
  store:    Arc<SqliteStore>,
  hook:     Arc<FakeHook>,
  reporter: Arc<RecordingReporter>,
  worker:   FanOutWorker<SqliteStore, Arc<FakeHook>>,
}

async fn harness_with(settings: FanOutSettings) -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let hook = Arc::new(FakeHook::default());
  let reporter = Arc::new(RecordingReporter::default());
  let worker = FanOutWorker::new(store.clone(), Some(hook.clone()), reporter.clone(), settings);
  Harness { store, hook, reporter, worker }
}

async fn harness() -> Harness { harness_with(settings()).await }

fn comment(id: &str, author: &str) -> NewComment { NewComment::new(id, CHAIN, author, APP, "gm", Utc::now()) }

async fn inbox(store: &SqliteStore, recipient: &str) -> Vec<Notification> {
  let query = NotificationQuery {
    filter: NotificationFilter { recipient: recipient.into(), ..Default::default() },
    page:   PageRequest::First,
    limit:  100,
  };
  store.list_notifications(&query).await.unwrap().notifications
}

fn pos() -> Position { Position { start: 0, end: 1 } }

// ─── Fan-out ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reply_scenario_is_idempotent() {
  let h = harness().await;
  h.store.insert_comment(comment("0xBB", BOB)).await.unwrap();
  h.worker.run_batch().await.unwrap();

  h.store
    .insert_comment(NewComment::new("0xAA", CHAIN, "0x1", APP, "gm", Utc::now()).reply_to("0xBB"))
    .await
    .unwrap();
  let pending = h.store.pending_events(10).await.unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].aggregate_id, "0xAA");
  assert_eq!(pending[0].event_type, "CommentAdded");

  let report = h.worker.run_batch().await.unwrap();
  assert_eq!(report.dispatched, 1);
  assert_eq!(report.notifications, 1);

  let notifications = inbox(&h.store, BOB).await;
  assert_eq!(notifications.len(), 1);
  assert_eq!(notifications[0].uid, "reply:8453:0xBB:0xAA");
  assert_eq!(notifications[0].notification_type, NotificationType::Reply);
  assert_eq!(notifications[0].recipient_address, BOB);
  assert_eq!(notifications[0].author_address, "0x1");

  // A second pass has nothing to do.
  assert_eq!(h.worker.run_batch().await.unwrap(), BatchReport::default());
  assert_eq!(inbox(&h.store, BOB).await.len(), 1);

  // Redelivering the same event derives the same uids and inserts nothing.
  let event = pending[0].decode().unwrap().unwrap();
  let again = classify(h.store.as_ref(), &event, 5).await.unwrap();
  let inserted = h.store.complete_event(pending[0].id, again.notifications).await.unwrap();
  assert_eq!(inserted, 0);
  assert_eq!(inbox(&h.store, BOB).await.len(), 1);
}

#[tokio::test]
async fn replies_notify_each_ancestor_author_once() {
  let h = harness_with(FanOutSettings { reply_depth_limit: 3, ..settings() }).await;
  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  h.store.insert_comment(comment("0xc2", BOB).reply_to("0xc1")).await.unwrap();
  h.store.insert_comment(comment("0xc3", ALICE).reply_to("0xc2")).await.unwrap();
  h.worker.run_batch().await.unwrap();

  h.store.insert_comment(comment("0xc4", CAROL).reply_to("0xc3")).await.unwrap();
  h.worker.run_batch().await.unwrap();

  let to_alice: Vec<_> = inbox(&h.store, ALICE)
    .await
    .into_iter()
    .filter(|n| n.entity_id == "0xc4")
    .collect();
  assert_eq!(to_alice.len(), 1);
  assert_eq!(to_alice[0].parent_id, "0xc3");

  let to_bob: Vec<_> = inbox(&h.store, BOB)
    .await
    .into_iter()
    .filter(|n| n.entity_id == "0xc4")
    .collect();
  assert_eq!(to_bob.len(), 1);
  assert_eq!(to_bob[0].uid, "reply:8453:0xc2:0xc4");

  // 0xc3 replied to Bob's comment; Alice is not notified about her own reply.
  let about_c3: Vec<_> = inbox(&h.store, ALICE)
    .await
    .into_iter()
    .filter(|n| n.entity_id == "0xc3")
    .collect();
  assert!(about_c3.is_empty());
}

#[tokio::test]
async fn reply_depth_limit_bounds_the_walk() {
  let h = harness_with(FanOutSettings { reply_depth_limit: 1, ..settings() }).await;
  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  h.store.insert_comment(comment("0xc2", BOB).reply_to("0xc1")).await.unwrap();
  h.store.insert_comment(comment("0xc3", CAROL).reply_to("0xc2")).await.unwrap();
  h.worker.run_batch().await.unwrap();

  assert_eq!(inbox(&h.store, BOB).await.len(), 1);
  assert!(
    inbox(&h.store, ALICE)
      .await
      .iter()
      .all(|n| n.entity_id != "0xc3")
  );
}

#[tokio::test]
async fn reactions_notify_the_parent_author() {
  let h = harness().await;
  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  h.store.insert_comment(comment("0xr1", BOB).reaction_to("0xc1")).await.unwrap();
  h.store.insert_comment(comment("0xr2", ALICE).reaction_to("0xc1")).await.unwrap();
  h.worker.run_batch().await.unwrap();

  let notifications = inbox(&h.store, ALICE).await;
  assert_eq!(notifications.len(), 1);
  assert_eq!(notifications[0].notification_type, NotificationType::Reaction);
  assert_eq!(notifications[0].uid, "reaction:8453:0xc1:0xr1");
}

#[tokio::test]
async fn mentions_and_quotes_come_from_references() {
  let h = harness().await;
  h.store.insert_comment(comment("0xq1", CAROL)).await.unwrap();

  let mut input = comment("0xm1", ALICE);
  input.references = vec![
    Reference::Ens { position: pos(), address: BOB.into(), name: "bob.eth".into(), avatar_url: None },
    Reference::Address { position: pos(), address: BOB.to_uppercase().replace("0X", "0x") },
    Reference::Address { position: pos(), address: ALICE.into() },
    Reference::Quote { position: pos(), comment_id: "0xq1".into() },
    Reference::Quote { position: pos(), comment_id: "0xgone".into() },
  ];
  input.references_status = Some(ResolutionStatus::Success);
  h.store.insert_comment(input).await.unwrap();

  let report = h.worker.run_batch().await.unwrap();
  assert_eq!(report.failed, 0);

  let to_bob = inbox(&h.store, BOB).await;
  assert_eq!(to_bob.len(), 1);
  assert_eq!(to_bob[0].uid, format!("mention:8453:0xm1:{BOB}"));

  let to_carol = inbox(&h.store, CAROL).await;
  assert_eq!(to_carol.len(), 1);
  assert_eq!(to_carol[0].uid, "quote:8453:0xq1:0xm1");

  assert!(inbox(&h.store, ALICE).await.is_empty());

  let reports = h.reporter.reports.lock().unwrap();
  assert_eq!(reports.len(), 1);
  assert_eq!(reports[0].0, "fanout");
  assert!(reports[0].1.contains("0xgone"));
  assert!(reports[0].2.contains(&("commentId", "0xm1".to_owned())));
}

#[tokio::test]
async fn edits_add_new_mentions_only() {
  let h = harness().await;
  h.store.insert_comment(comment("0xm1", ALICE)).await.unwrap();
  h.worker.run_batch().await.unwrap();
  assert!(inbox(&h.store, BOB).await.is_empty());

  let resolution = ReferenceResolution {
    references: vec![Reference::Address { position: pos(), address: BOB.into() }],
    status:     ResolutionStatus::Success,
  };
  for content in ["hi @bob", "hi @bob!"] {
    h.store
      .edit_comment(CommentEdit {
        id:         "0xm1".into(),
        content:    content.into(),
        resolution: Some(resolution.clone()),
      })
      .await
      .unwrap();
  }
  h.worker.run_batch().await.unwrap();
  assert_eq!(inbox(&h.store, BOB).await.len(), 1);
}

#[tokio::test]
async fn missing_comment_is_skipped_and_reported() {
  let h = harness().await;
  h.store.insert_comment(comment("0xorphan", BOB).reply_to("0xnowhere")).await.unwrap();
  let report = h.worker.run_batch().await.unwrap();
  assert_eq!(report.dispatched, 1);
  assert_eq!(report.failed, 0);
  assert!(h.store.pending_events(10).await.unwrap().is_empty());

  let reports = h.reporter.reports.lock().unwrap();
  assert_eq!(reports.len(), 1);
  assert!(reports[0].1.contains("0xnowhere"));
}

#[tokio::test]
async fn deleted_entities_produce_nothing() {
  let h = harness().await;
  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  h.store.insert_comment(comment("0xc2", BOB).reply_to("0xc1")).await.unwrap();
  h.store.delete_comment("0xc2".into()).await.unwrap();
  let report = h.worker.run_batch().await.unwrap();
  assert_eq!(report.dispatched, 3);
  assert_eq!(report.notifications, 0);
}

// ─── Moderation and failures ─────────────────────────────────────────────────

#[tokio::test]
async fn pending_comments_are_sent_for_review() {
  let h = harness().await;
  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  let mut approved = comment("0xc2", ALICE);
  approved.moderation_status = ModerationStatus::Approved;
  h.store.insert_comment(approved).await.unwrap();
  h.worker.run_batch().await.unwrap();

  assert_eq!(*h.hook.requested.lock().unwrap(), vec![("0xc1".to_owned(), None)]);
}

#[tokio::test]
async fn review_requests_for_replies_name_the_thread_root() {
  let h = harness().await;
  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  h.store.insert_comment(comment("0xc2", BOB).reply_to("0xc1")).await.unwrap();
  h.store.insert_comment(comment("0xc3", CAROL).reply_to("0xc2")).await.unwrap();
  h.worker.run_batch().await.unwrap();

  assert_eq!(*h.hook.requested.lock().unwrap(), vec![
    ("0xc1".to_owned(), None),
    ("0xc2".to_owned(), Some("0xc1".to_owned())),
    ("0xc3".to_owned(), Some("0xc1".to_owned())),
  ]);
}

#[tokio::test]
async fn failures_block_the_aggregate_until_flagged() {
  let h = harness_with(FanOutSettings { max_attempts: 2, ..settings() }).await;
  h.hook.fail.store(true, Ordering::SeqCst);

  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  h.store
    .set_moderation_status("0xc1".into(), ModerationStatus::Approved)
    .await
    .unwrap();
  let mut other = comment("0xc2", BOB);
  other.moderation_status = ModerationStatus::Approved;
  h.store.insert_comment(other).await.unwrap();

  let first = h.worker.run_batch().await.unwrap();
  assert_eq!(first, BatchReport {
    selected:      3,
    dispatched:    1,
    failed:        1,
    deferred:      1,
    notifications: 0,
  });
  let pending = h.store.pending_events(10).await.unwrap();
  assert_eq!(pending.len(), 2);
  assert_eq!(pending[0].attempts, 1);
  assert!(pending[0].last_error.as_deref().unwrap().contains("503"));

  // Second failure reaches max_attempts and flags the event.
  let second = h.worker.run_batch().await.unwrap();
  assert_eq!((second.failed, second.deferred), (1, 1));

  let third = h.worker.run_batch().await.unwrap();
  assert_eq!((third.selected, third.dispatched), (1, 1));
  assert!(h.store.pending_events(10).await.unwrap().is_empty());

  let reports = h.reporter.reports.lock().unwrap();
  assert_eq!(reports.len(), 2);
  assert!(reports[0].2.contains(&("attempt", "1".to_owned())));
}

#[tokio::test]
async fn failed_bookkeeping_is_reported_and_the_batch_continues() {
  let h = harness().await;
  h.hook.fail.store(true, Ordering::SeqCst);
  h.store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  h.store.insert_comment(comment("0xc2", BOB)).await.unwrap();
  let mut approved = comment("0xc3", CAROL);
  approved.moderation_status = ModerationStatus::Approved;
  h.store.insert_comment(approved).await.unwrap();
  h.store
    .write(|tx| {
      tx.execute_batch(
        "CREATE TRIGGER attempts_locked BEFORE UPDATE OF attempts ON outbox_events
         BEGIN SELECT RAISE(ABORT, 'attempts are locked'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let report = h.worker.run_batch().await.unwrap();
  assert_eq!((report.selected, report.failed, report.dispatched), (3, 2, 1));
  assert_eq!(h.store.pending_events(10).await.unwrap().len(), 2);

  let reports = h.reporter.reports.lock().unwrap();
  let locked = reports.iter().filter(|r| r.1.contains("attempts are locked")).count();
  assert_eq!(locked, 2);
}

#[tokio::test]
async fn run_drains_until_shutdown() {
  let h = harness().await;
  let (tx, rx) = tokio::sync::watch::channel(false);
  let store = h.store.clone();
  let worker = h.worker;
  let handle = tokio::spawn(async move { worker.run(rx).await });

  store.insert_comment(comment("0xc1", ALICE)).await.unwrap();
  store.insert_comment(comment("0xc2", BOB).reply_to("0xc1")).await.unwrap();

  tokio::time::timeout(Duration::from_secs(5), async {
    while inbox(&store, ALICE).await.is_empty() {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("worker dispatched the reply");

  tx.send(true).unwrap();
  tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("worker stopped")
    .unwrap();
}

// ─── Refresher ───────────────────────────────────────────────────────────────

/// Resolves every comment to one webpage reference; optionally edits the
/// comment mid-resolution.
struct FakeResolver {
  status:       ResolutionStatus,
  edit_through: Option<Arc<SqliteStore>>,
}

impl ReferenceResolver for FakeResolver {
  async fn resolve<'a>(&'a self, _chain_id: u64, content: &'a str) -> ReferenceResolution {
    if let Some(store) = &self.edit_through {
      store
        .edit_comment(CommentEdit {
          id:         "0xc1".into(),
          content:    format!("{content} (edited)"),
          resolution: None,
        })
        .await
        .unwrap();
    }
    ReferenceResolution {
      references: vec![Reference::Webpage {
        position:   pos(),
        url:        "https://example.com".into(),
        title:      Some("Example".into()),
        media_type: "text/html".into(),
      }],
      status:     self.status,
    }
  }
}

async fn failed_comment(store: &SqliteStore, id: &str) {
  let mut input = comment(id, ALICE);
  input.content = "see https://example.com".into();
  input.references_status = Some(ResolutionStatus::Failed);
  store.insert_comment(input).await.unwrap();
}

fn options(dry_run: bool) -> RefreshOptions {
  RefreshOptions { max_age: chrono::Duration::days(7), batch_size: 10, dry_run }
}

fn refresher(
  store: &Arc<SqliteStore>,
  resolver: FakeResolver,
) -> (Refresher<SqliteStore, FakeResolver>, Arc<RecordingReporter>) {
  let reporter = Arc::new(RecordingReporter::default());
  (Refresher::new(store.clone(), resolver, reporter.clone()), reporter)
}

#[tokio::test]
async fn refresher_stores_new_resolutions() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  failed_comment(&store, "0xc1").await;
  failed_comment(&store, "0xc2").await;
  store.delete_comment("0xc2".into()).await.unwrap();

  let (dry, _) = refresher(&store, FakeResolver { status: ResolutionStatus::Success, edit_through: None });
  let report = dry.run(&options(true)).await.unwrap();
  assert_eq!(report, RefreshReport { candidates: 2, ..Default::default() });

  let (job, reporter) =
    refresher(&store, FakeResolver { status: ResolutionStatus::Success, edit_through: None });
  let report = job.run(&options(false)).await.unwrap();
  assert_eq!(report, RefreshReport { candidates: 2, success: 1, skipped: 1, ..Default::default() });
  assert!(reporter.reports.lock().unwrap().is_empty());

  let result = store.get_resolution("0xc1".into()).await.unwrap().unwrap();
  assert_eq!(result.status, ResolutionStatus::Success);
  assert_eq!(result.references.len(), 1);
  let comment = store.get_comment("0xc1".into()).await.unwrap().unwrap();
  assert_eq!(comment.references_status, Some(ResolutionStatus::Success));

  let events = store.pending_events(20).await.unwrap();
  assert_eq!(events.last().unwrap().event_type, "CommentReferencesUpdated");

  // Only the deleted comment's stale failure is left.
  let report = job.run(&options(false)).await.unwrap();
  assert_eq!(report, RefreshReport { candidates: 1, skipped: 1, ..Default::default() });
}

#[tokio::test]
async fn refresher_counts_partial_results() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  failed_comment(&store, "0xc1").await;
  let (job, _) = refresher(&store, FakeResolver { status: ResolutionStatus::Partial, edit_through: None });
  let report = job.run(&options(false)).await.unwrap();
  assert_eq!(report.partial, 1);

  // Partial results stay candidates.
  let report = job.run(&options(false)).await.unwrap();
  assert_eq!(report.candidates, 1);
}

#[tokio::test]
async fn refresher_drops_results_for_edited_comments() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  failed_comment(&store, "0xc1").await;
  let (job, _) = refresher(&store, FakeResolver {
    status:       ResolutionStatus::Success,
    edit_through: Some(store.clone()),
  });
  let report = job.run(&options(false)).await.unwrap();
  assert_eq!(report.skipped, 1);
  assert_eq!(report.success, 0);

  let result = store.get_resolution("0xc1".into()).await.unwrap().unwrap();
  assert_eq!(result.status, ResolutionStatus::Failed);
  assert_eq!(result.comment_revision, 0);
}
