//! Error reporting for failures that are handled, not propagated.
//!
//! Batch loops catch per-item errors and hand them to an [`ErrorReporter`]
//! with contextual tags, then move on to the next item.

/// Sink for per-item errors inside batch loops.
pub trait ErrorReporter: Send + Sync {
  fn report(
    &self,
    component: &'static str,
    error: &(dyn std::error::Error + 'static),
    tags: &[(&'static str, String)],
  );
}

/// Default reporter: one `tracing` error event per report.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
  fn report(
    &self,
    component: &'static str,
    error: &(dyn std::error::Error + 'static),
    tags: &[(&'static str, String)],
  ) {
    let tags = tags
      .iter()
      .map(|(k, v)| format!("{k}={v}"))
      .collect::<Vec<_>>()
      .join(" ");
    tracing::error!(component, tags = %tags, error = %error, "operation failed");
  }
}
