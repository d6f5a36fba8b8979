//! Batch job re-resolving references whose last resolution failed or was
//! partial.
//!
//! Resolution happens outside any transaction. The write then re-checks the
//! comment under the store's write lock and drops the result when the
//! comment was deleted or edited in the meantime.

use std::sync::Arc;

use chrono::Duration;
use quill_core::{
  reference::{CommentReferenceResolutionResult, ResolutionStatus},
  report::ErrorReporter,
  store::{CommentStore, ReferenceResultStore, ResolutionWrite},
};
use quill_resolver::references::ReferenceResolver;
use serde::Serialize;
use tracing::Instrument as _;

use crate::{Error, Result};

const COMPONENT: &str = "refresher";

#[derive(Debug, Clone)]
pub struct RefreshOptions {
  /// Only results that first failed within this window are retried.
  pub max_age:    Duration,
  pub batch_size: usize,
  /// List the candidates without resolving anything.
  pub dry_run:    bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
  pub candidates: usize,
  pub success:    usize,
  pub partial:    usize,
  pub failed:     usize,
  /// Deleted, missing, or edited while resolving.
  pub skipped:    usize,
  pub errors:     usize,
}

enum RowOutcome {
  Stored(ResolutionStatus),
  Skipped(&'static str),
}

pub struct Refresher<S, R> {
  store:    Arc<S>,
  resolver: R,
  reporter: Arc<dyn ErrorReporter>,
}

impl<S, R> Refresher<S, R>
where
  S: CommentStore + ReferenceResultStore,
  R: ReferenceResolver,
{
  pub fn new(store: Arc<S>, resolver: R, reporter: Arc<dyn ErrorReporter>) -> Self {
    Self { store, resolver, reporter }
  }

  pub async fn run(&self, options: &RefreshOptions) -> Result<RefreshReport> {
    let candidates = self
      .store
      .refresh_candidates(options.max_age, options.batch_size)
      .await
      .map_err(Error::store)?;

    let mut report = RefreshReport { candidates: candidates.len(), ..Default::default() };
    tracing::info!(candidates = candidates.len(), dry_run = options.dry_run, "refreshing references");

    if options.dry_run {
      for c in &candidates {
        tracing::info!(
          comment_id = %c.comment_id,
          revision = c.comment_revision,
          status = %c.status,
          updated_at = %c.updated_at,
          "candidate"
        );
      }
      return Ok(report);
    }

    for candidate in &candidates {
      let span = tracing::info_span!(
        "refresh",
        comment_id = %candidate.comment_id,
        revision = candidate.comment_revision,
      );
      match self.refresh_one(candidate).instrument(span).await {
        Ok(RowOutcome::Stored(ResolutionStatus::Success)) => report.success += 1,
        Ok(RowOutcome::Stored(ResolutionStatus::Partial)) => report.partial += 1,
        Ok(RowOutcome::Stored(ResolutionStatus::Failed)) => report.failed += 1,
        Ok(RowOutcome::Skipped(reason)) => {
          tracing::debug!(comment_id = %candidate.comment_id, reason, "skipped");
          report.skipped += 1;
        }
        Err(e) => {
          report.errors += 1;
          self.reporter.report(COMPONENT, &e, &[
            ("commentId", candidate.comment_id.clone()),
            ("revision", candidate.comment_revision.to_string()),
          ]);
        }
      }
    }

    tracing::info!(
      success = report.success,
      partial = report.partial,
      failed = report.failed,
      skipped = report.skipped,
      errors = report.errors,
      "refresh complete"
    );
    Ok(report)
  }

  async fn refresh_one(&self, candidate: &CommentReferenceResolutionResult) -> Result<RowOutcome> {
    let comment = self
      .store
      .get_comment(candidate.comment_id.clone())
      .await
      .map_err(Error::store)?;
    let Some(comment) = comment else {
      return Ok(RowOutcome::Skipped("comment missing"));
    };
    if comment.is_deleted() {
      return Ok(RowOutcome::Skipped("comment deleted"));
    }

    let resolution = self.resolver.resolve(comment.chain_id, &comment.content).await;

    let write = self
      .store
      .store_resolution(comment.id, comment.revision, resolution)
      .await
      .map_err(Error::store)?;
    Ok(match write {
      ResolutionWrite::Stored(result) => RowOutcome::Stored(result.status),
      ResolutionWrite::StaleRevision { .. } => RowOutcome::Skipped("edited while resolving"),
      ResolutionWrite::CommentDeleted => RowOutcome::Skipped("comment deleted"),
      ResolutionWrite::CommentMissing => RowOutcome::Skipped("comment missing"),
    })
  }
}
