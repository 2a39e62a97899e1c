//! Durable, ordered store of mutating requests awaiting delivery.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::stream::{self, Stream};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::{parse_datetime, Database};
use crate::net::{Headers, Request, RequestMode};

/// One not-yet-acknowledged mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingAction {
  /// Monotonically assigned; ordering by id is enqueue order
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: Headers,
  #[serde(with = "crate::net::wire_body")]
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

impl PendingAction {
  /// Rebuild the queued request for redelivery.
  pub fn to_request(&self) -> Request {
    Request {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      mode: RequestMode::Other,
    }
  }
}

/// SQLite-backed pending action queue.
#[derive(Clone)]
pub struct PendingActionQueue {
  db: Database,
}

type ActionRow = (i64, String, String, Vec<u8>, Option<Vec<u8>>, String);

const SELECT_ACTION: &str =
  "SELECT id, url, method, headers, body, enqueued_at FROM pending_actions";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_action(row: ActionRow) -> Result<PendingAction> {
  let (id, url, method, headers, body, enqueued_at) = row;
  let headers: Headers = serde_json::from_slice(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers of action {}: {}", id, e))?;

  Ok(PendingAction {
    id,
    url,
    method,
    headers,
    body,
    enqueued_at: parse_datetime(&enqueued_at)?,
  })
}

impl PendingActionQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Durably append a request; returns the stored action with its new id.
  pub fn enqueue(&self, request: &Request) -> Result<PendingAction> {
    let headers = serde_json::to_vec(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT INTO pending_actions (url, method, headers, body, enqueued_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![request.url, request.method.to_uppercase(), headers, request.body],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", request.method, request.url, e))?;

    let id = conn.last_insert_rowid();
    let row = conn
      .query_row(
        &format!("{} WHERE id = ?", SELECT_ACTION),
        params![id],
        read_row,
      )
      .map_err(|e| eyre!("Failed to read back action {}: {}", id, e))?;

    into_action(row)
  }

  /// Durably delete one action. Removing an unknown id is a no-op.
  ///
  /// Returns whether an action was deleted.
  pub fn remove(&self, id: i64) -> Result<bool> {
    let removed = self
      .db
      .lock()?
      .execute("DELETE FROM pending_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove action {}: {}", id, e))?;

    Ok(removed > 0)
  }

  /// The oldest stored action with an id greater than `after`.
  fn next_after(&self, after: i64) -> Result<Option<PendingAction>> {
    let row = self
      .db
      .lock()?
      .query_row(
        &format!("{} WHERE id > ? ORDER BY id LIMIT 1", SELECT_ACTION),
        params![after],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read pending actions: {}", e))?;

    row.map(into_action).transpose()
  }

  /// Lazily yield every stored action in enqueue order.
  ///
  /// Each step reads the durable state, so actions removed mid-drain are not
  /// yielded and actions enqueued mid-drain are. A fresh call starts over from
  /// whatever is stored at that point.
  pub fn drain_in_order(&self) -> impl Stream<Item = Result<PendingAction>> + '_ {
    stream::unfold(Some(0i64), move |cursor| async move {
      let after = cursor?;
      match self.next_after(after) {
        Ok(Some(action)) => {
          let id = action.id;
          Some((Ok(action), Some(id)))
        }
        Ok(None) => None,
        // Yield the error once, then end the stream
        Err(e) => Some((Err(e), None)),
      }
    })
  }

  /// Snapshot of every stored action in enqueue order.
  pub fn list(&self) -> Result<Vec<PendingAction>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(&format!("{} ORDER BY id", SELECT_ACTION))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to list pending actions: {}", e))?
      .collect::<rusqlite::Result<Vec<ActionRow>>>()
      .map_err(|e| eyre!("Failed to read pending action row: {}", e))?;

    rows.into_iter().map(into_action).collect()
  }

  pub fn len(&self) -> Result<usize> {
    let count: i64 = self
      .db
      .lock()?
      .query_row("SELECT COUNT(*) FROM pending_actions", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending actions: {}", e))?;

    Ok(count as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;

  fn queue() -> PendingActionQueue {
    PendingActionQueue::new(Database::open_in_memory().unwrap())
  }

  fn post(url: &str) -> Request {
    Request::get(url)
      .with_method("POST")
      .with_header("Content-Type", "application/json")
      .with_body(r#"{"checked":true}"#)
  }

  #[test]
  fn test_enqueue_assigns_increasing_ids() {
    let queue = queue();
    let a = queue.enqueue(&post("/a")).unwrap();
    let b = queue.enqueue(&post("/b")).unwrap();

    assert!(b.id > a.id);
    assert_eq!(a.method, "POST");
    assert_eq!(a.url, "/a");
    assert_eq!(a.headers.get("content-type").map(String::as_str), Some("application/json"));
    assert_eq!(a.body.as_deref(), Some(br#"{"checked":true}"#.as_slice()));
  }

  #[test]
  fn test_ids_are_not_reused_after_remove() {
    let queue = queue();
    let a = queue.enqueue(&post("/a")).unwrap();
    queue.remove(a.id).unwrap();
    let b = queue.enqueue(&post("/b")).unwrap();
    assert!(b.id > a.id);
  }

  #[test]
  fn test_remove_unknown_id_is_noop() {
    let queue = queue();
    let a = queue.enqueue(&post("/a")).unwrap();

    assert!(queue.remove(a.id).unwrap());
    assert!(!queue.remove(a.id).unwrap());
    assert!(!queue.remove(9999).unwrap());
    assert_eq!(queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_drain_preserves_insertion_order() {
    let queue = queue();
    for url in ["/a", "/b", "/c"] {
      queue.enqueue(&post(url)).unwrap();
    }

    let urls: Vec<String> = queue
      .drain_in_order()
      .map(|a| a.unwrap().url)
      .collect()
      .await;
    assert_eq!(urls, vec!["/a", "/b", "/c"]);
  }

  #[tokio::test]
  async fn test_drain_reflects_changes_mid_iteration() {
    let queue = queue();
    let a = queue.enqueue(&post("/a")).unwrap();
    let b = queue.enqueue(&post("/b")).unwrap();

    let mut seen = Vec::new();
    {
      let mut actions = std::pin::pin!(queue.drain_in_order());
      while let Some(action) = actions.next().await {
        let action = action.unwrap();
        if action.id == a.id {
          queue.remove(b.id).unwrap();
          queue.enqueue(&post("/c")).unwrap();
        }
        seen.push(action.url);
      }
    }

    assert_eq!(seen, vec!["/a", "/c"]);
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    let first = PendingActionQueue::new(Database::open(&path).unwrap());
    let stored = first.enqueue(&post("/shopping_list/42")).unwrap();
    drop(first);

    let reopened = PendingActionQueue::new(Database::open(&path).unwrap());
    assert_eq!(reopened.list().unwrap(), vec![stored]);
  }
}
