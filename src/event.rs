use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::host::View;
use crate::net::Request;
use crate::notify::Notification;

/// Events delivered by the hosting environment, one JSON object per line
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
  /// Pre-cache the manifest into the current namespace
  Install,
  /// Evict stale namespaces and start controlling fetches
  Activate,
  /// Outgoing read request from the application
  Fetch { request: Request },
  /// Mutating request the application wants delivered
  Submit { request: Request },
  /// Connectivity restored for a background sync tag
  Sync { tag: String },
  /// Push message with optional raw data
  Push {
    #[serde(default)]
    data: Option<String>,
  },
  /// User clicked a notification shown earlier
  NotificationClick { notification: Notification },
  /// Host's current list of open views
  ViewsChanged { views: Vec<View> },
}

/// Discriminant used to look up the handler for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Submit,
  Sync,
  Push,
  NotificationClick,
  ViewsChanged,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::Install => EventKind::Install,
      Event::Activate => EventKind::Activate,
      Event::Fetch { .. } => EventKind::Fetch,
      Event::Submit { .. } => EventKind::Submit,
      Event::Sync { .. } => EventKind::Sync,
      Event::Push { .. } => EventKind::Push,
      Event::NotificationClick { .. } => EventKind::NotificationClick,
      Event::ViewsChanged { .. } => EventKind::ViewsChanged,
    }
  }
}

/// One line of host input
#[derive(Debug)]
pub enum Input {
  Event(Event),
  /// A line that did not parse as an event, with the parse error
  Malformed(String),
}

/// Event handler that produces events from line-delimited JSON input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Input>,
}

impl EventHandler {
  /// Read events from stdin
  pub fn stdin() -> Self {
    Self::from_reader(tokio::io::stdin())
  }

  /// Read events from any async reader until it reaches end of input
  pub fn from_reader<R>(reader: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn input reader
    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if line.trim().is_empty() {
              continue;
            }
            let input = match serde_json::from_str::<Event>(&line) {
              Ok(event) => Input::Event(event),
              Err(e) => {
                warn!("malformed event line: {}", e);
                Input::Malformed(e.to_string())
              }
            };
            if tx.send(input).is_err() {
              break;
            }
          }
          Ok(None) => break,
          Err(e) => {
            warn!("event input failed: {}", e);
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next input line; `None` once input is exhausted
  pub async fn next(&mut self) -> Option<Input> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_event_kinds() {
    let cases = [
      (r#"{"type": "install"}"#, EventKind::Install),
      (r#"{"type": "activate"}"#, EventKind::Activate),
      (r#"{"type": "fetch", "request": {"url": "/"}}"#, EventKind::Fetch),
      (
        r#"{"type": "submit", "request": {"method": "POST", "url": "/shopping_list/42"}}"#,
        EventKind::Submit,
      ),
      (r#"{"type": "sync", "tag": "sync-shopping-list"}"#, EventKind::Sync),
      (r#"{"type": "push"}"#, EventKind::Push),
      (r#"{"type": "views_changed", "views": []}"#, EventKind::ViewsChanged),
    ];

    for (line, kind) in cases {
      let event: Event = serde_json::from_str(line).unwrap();
      assert_eq!(event.kind(), kind, "{}", line);
    }
  }

  #[tokio::test]
  async fn test_reader_skips_blank_lines_and_flags_malformed_ones() {
    let input: &'static [u8] = b"{\"type\": \"install\"}\n\nnot json\n{\"type\": \"push\", \"data\": \"x\"}\n";
    let mut events = EventHandler::from_reader(input);

    assert!(matches!(events.next().await, Some(Input::Event(Event::Install))));
    assert!(matches!(events.next().await, Some(Input::Malformed(_))));
    match events.next().await {
      Some(Input::Event(Event::Push { data })) => assert_eq!(data.as_deref(), Some("x")),
      other => panic!("unexpected event: {:?}", other),
    }
    assert!(events.next().await.is_none());
  }
}
