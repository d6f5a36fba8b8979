//! Process signals turned into a `watch` channel the loops can poll.

use tokio::sync::watch;

/// Spawn a task that flips the returned receiver to `true` on SIGINT,
/// SIGTERM or SIGHUP.
pub fn shutdown_signal() -> std::io::Result<watch::Receiver<bool>> {
  let (tx, rx) = watch::channel(false);
  let signals = Signals::install()?;
  tokio::spawn(async move {
    let name = signals.recv().await;
    tracing::info!(signal = name, "shutdown requested; finishing current batch");
    let _ = tx.send(true);
  });
  Ok(rx)
}

#[cfg(unix)]
struct Signals {
  term: tokio::signal::unix::Signal,
  hup:  tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
  fn install() -> std::io::Result<Self> {
    use tokio::signal::unix::{SignalKind, signal};
    Ok(Self {
      term: signal(SignalKind::terminate())?,
      hup:  signal(SignalKind::hangup())?,
    })
  }

  async fn recv(mut self) -> &'static str {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => "SIGINT",
      _ = self.term.recv() => "SIGTERM",
      _ = self.hup.recv() => "SIGHUP",
    }
  }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
  fn install() -> std::io::Result<Self> { Ok(Self) }

  async fn recv(self) -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
  }
}
