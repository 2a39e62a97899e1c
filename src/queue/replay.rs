//! Replays pending actions once connectivity returns.

use color_eyre::Result;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::store::PendingActionQueue;
use crate::net::{is_delivered, Network};

/// What one replay pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
  /// Ids delivered and removed, in replay order
  pub delivered: Vec<i64>,
  /// Ids left queued for the next trigger, in replay order
  pub failed: Vec<i64>,
}

/// Drains the pending action queue against the network.
///
/// Actions are re-sent one at a time in enqueue order. A failed action stays
/// queued and does not stop the pass; it is retried on the next trigger only.
pub struct SyncReplayer<N: Network> {
  network: Arc<N>,
  queue: PendingActionQueue,
  /// Serializes passes so two triggers never interleave deliveries
  pass: Mutex<()>,
}

impl<N: Network> SyncReplayer<N> {
  pub fn new(network: Arc<N>, queue: PendingActionQueue) -> Self {
    Self {
      network,
      queue,
      pass: Mutex::new(()),
    }
  }

  /// Run one replay pass over the current queue contents.
  pub async fn replay(&self) -> Result<ReplayReport> {
    let _pass = self.pass.lock().await;
    let mut report = ReplayReport::default();

    let mut actions = std::pin::pin!(self.queue.drain_in_order());
    while let Some(action) = actions.next().await {
      let action = action?;

      let result = self.network.send(action.to_request()).await;
      if is_delivered(&result) {
        self.queue.remove(action.id)?;
        report.delivered.push(action.id);
        continue;
      }

      match result {
        Ok(response) => warn!(
          id = action.id,
          url = %action.url,
          status = response.status,
          "replay rejected by server, keeping action queued"
        ),
        Err(e) => warn!(
          id = action.id,
          url = %action.url,
          "replay failed, keeping action queued: {}", e
        ),
      }
      report.failed.push(action.id);
    }

    info!(
      delivered = report.delivered.len(),
      failed = report.failed.len(),
      remaining = self.queue.len()?,
      "replay pass finished"
    );

    Ok(report)
  }
}
