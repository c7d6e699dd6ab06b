use color_eyre::Result;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Tracks fire-and-forget writes started by mutation requests.
///
/// Failures are logged and go no further; the response has already been
/// sent. `drain` waits for whatever is still running.
#[derive(Clone, Default)]
pub struct BackgroundWrites {
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundWrites {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start `write` in the background.
  pub fn spawn<F>(&self, operation: &'static str, write: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let Ok(mut tasks) = self.tasks.lock() else {
      warn!(operation, "background write tracker poisoned, write dropped");
      return;
    };

    // Reap finished tasks so the set does not grow without bound
    while tasks.try_join_next().is_some() {}

    tasks.spawn(async move {
      match write.await {
        Ok(()) => debug!(operation, "background write committed"),
        Err(e) => warn!(operation, error = %e, "background write failed"),
      }
    });
  }

  /// Writes started but not yet reaped.
  pub fn pending(&self) -> usize {
    self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
  }

  /// Wait for every outstanding write to finish.
  pub async fn drain(&self) {
    let mut tasks = match self.tasks.lock() {
      Ok(mut tasks) => std::mem::take(&mut *tasks),
      Err(_) => return,
    };

    while let Some(result) = tasks.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "background write panicked");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn test_drain_waits_for_writes() {
    let writes = BackgroundWrites::new();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
      let done = Arc::clone(&done);
      writes.spawn("test", async move {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        done.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }

    writes.drain().await;
    assert_eq!(done.load(Ordering::SeqCst), 5);
    assert_eq!(writes.pending(), 0);
  }

  #[tokio::test]
  async fn test_failed_write_is_swallowed() {
    let writes = BackgroundWrites::new();
    writes.spawn("test", async { Err(eyre!("disk full")) });
    writes.drain().await;
    assert_eq!(writes.pending(), 0);
  }
}
