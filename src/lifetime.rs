//! Keep-alive registry for background work started by event handlers.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

/// Work registered here is awaited by the scheduler before the process exits.
#[derive(Clone, Default)]
pub struct WaitUntil {
  pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WaitUntil {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn a task and keep the process alive until it settles.
  pub fn spawn<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(task);

    match self.pending.lock() {
      Ok(mut pending) => {
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
      }
      Err(e) => warn!("wait-until registry poisoned, task not tracked: {}", e),
    }
  }

  /// Number of registered tasks that have not finished yet.
  #[cfg(test)]
  pub fn in_flight(&self) -> usize {
    self
      .pending
      .lock()
      .map(|p| p.iter().filter(|h| !h.is_finished()).count())
      .unwrap_or(0)
  }

  /// Wait for every registered task, including ones registered while waiting.
  pub async fn settle(&self) {
    loop {
      let batch = self.take_pending();
      if batch.is_empty() {
        return;
      }

      for handle in batch {
        if let Err(e) = handle.await {
          warn!("background task failed: {}", e);
        }
      }
    }
  }

  fn take_pending(&self) -> Vec<JoinHandle<()>> {
    match self.pending.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(_) => Vec::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn test_settle_waits_for_nested_tasks() {
    let wait_until = WaitUntil::new();
    let counter = Arc::new(AtomicU32::new(0));

    let inner = wait_until.clone();
    let outer_counter = counter.clone();
    wait_until.spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      let nested_counter = outer_counter.clone();
      inner.spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        nested_counter.fetch_add(1, Ordering::SeqCst);
      });
      outer_counter.fetch_add(1, Ordering::SeqCst);
    });

    wait_until.settle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(wait_until.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_settle_with_nothing_registered() {
    WaitUntil::new().settle().await;
  }
}
