use color_eyre::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use crate::event::{Event, EventHandler, EventKind, Input};
use crate::host::{Output, StdioHost};
use crate::lifetime::WaitUntil;
use crate::net::Network;
use crate::worker::{handlers, Handler, Outcome, Worker};

/// Scheduler: feeds host events to the worker's handlers and reports outcomes
pub struct App<N: Network> {
  worker: Arc<Worker<N, StdioHost>>,
  host: Arc<StdioHost>,
  handlers: HashMap<EventKind, Handler<N, StdioHost>>,
  wait_until: WaitUntil,
  out: Output,
  /// Sequence number of the last dispatched event
  seq: u64,
}

impl<N: Network> App<N> {
  pub fn new(
    worker: Arc<Worker<N, StdioHost>>,
    host: Arc<StdioHost>,
    wait_until: WaitUntil,
    out: Output,
  ) -> Self {
    Self {
      worker,
      host,
      handlers: handlers(),
      wait_until,
      out,
      seq: 0,
    }
  }

  /// Take over from whatever an earlier run left active.
  ///
  /// Nothing is fetched when the configured version is already active.
  /// Otherwise it installs then activates; a failed install is reported and
  /// the previously active namespace, if any, keeps serving.
  pub async fn start(&mut self) -> Result<()> {
    if let Some(outcome) = self.worker.resume()? {
      let seq = self.next_seq();
      report(&self.out, seq, EventKind::Activate, Ok(outcome));
      return Ok(());
    }

    let seq = self.next_seq();
    match self.handler(EventKind::Install)(self.worker.clone(), Event::Install).await {
      Ok(outcome) => report(&self.out, seq, EventKind::Install, Ok(outcome)),
      Err(e) => {
        warn!("install failed, previous version stays in control: {}", e);
        report(&self.out, seq, EventKind::Install, Err(e.to_string()));
        return Ok(());
      }
    }

    let seq = self.next_seq();
    match self.handler(EventKind::Activate)(self.worker.clone(), Event::Activate).await {
      Ok(outcome) => {
        report(&self.out, seq, EventKind::Activate, Ok(outcome));
        Ok(())
      }
      Err(e) => {
        report(&self.out, seq, EventKind::Activate, Err(e.to_string()));
        Err(e)
      }
    }
  }

  /// Dispatch events until input ends, then wait for all outstanding work.
  ///
  /// Events are dispatched one at a time; their handlers run concurrently.
  pub async fn run(mut self, mut events: EventHandler) -> Result<()> {
    let mut in_flight = JoinSet::new();

    while let Some(input) = events.next().await {
      let seq = self.next_seq();
      let event = match input {
        Input::Event(event) => event,
        Input::Malformed(error) => {
          send(&self.out, seq, json!({ "seq": seq, "event": null, "error": error }));
          continue;
        }
      };
      let kind = event.kind();

      if let Event::ViewsChanged { views } = event {
        let result = self
          .host
          .replace_views(views)
          .map(|_| Value::Null)
          .map_err(|e| e.to_string());
        emit(&self.out, seq, kind, result);
        continue;
      }

      let handler = self.handler(kind);
      let future = handler(self.worker.clone(), event);
      let out = self.out.clone();
      in_flight.spawn(async move {
        let result = future.await.map_err(|e| e.to_string());
        report(&out, seq, kind, result);
      });
    }

    info!(events = self.seq, "input closed, waiting for in-flight work");
    while let Some(joined) = in_flight.join_next().await {
      if let Err(e) = joined {
        warn!("event handler task failed: {}", e);
      }
    }
    self.wait_until.settle().await;

    Ok(())
  }

  fn next_seq(&mut self) -> u64 {
    self.seq += 1;
    self.seq
  }

  fn handler(&self, kind: EventKind) -> Handler<N, StdioHost> {
    // Every kind but views_changed is registered in `handlers()`
    self.handlers[&kind]
  }
}

fn report(out: &Output, seq: u64, kind: EventKind, result: Result<Outcome, String>) {
  let result = result.and_then(|outcome| serde_json::to_value(outcome).map_err(|e| e.to_string()));
  emit(out, seq, kind, result);
}

fn emit(out: &Output, seq: u64, kind: EventKind, result: Result<Value, String>) {
  let line = match result {
    Ok(outcome) => json!({ "seq": seq, "event": kind, "outcome": outcome }),
    Err(error) => json!({ "seq": seq, "event": kind, "error": error }),
  };
  send(out, seq, line);
}

fn send(out: &Output, seq: u64, line: Value) {
  if out.send(line).is_err() {
    warn!(seq, "output closed, dropping result");
  }
}

/// Spawn the task that writes output lines to stdout.
///
/// It finishes once every sender has been dropped.
pub fn spawn_writer(mut rx: mpsc::UnboundedReceiver<Value>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
      let mut text = line.to_string();
      text.push('\n');
      if let Err(e) = stdout.write_all(text.as_bytes()).await {
        warn!("failed to write output: {}", e);
        break;
      }
      if let Err(e) = stdout.flush().await {
        warn!("failed to flush output: {}", e);
        break;
      }
    }
  })
}
