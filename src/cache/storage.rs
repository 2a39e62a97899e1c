//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::traits::{CachedEntry, RequestKey};
use crate::db::{parse_datetime, Database};
use crate::net::{Headers, ResponseSnapshot};

/// Trait for cache storage backends.
///
/// Storage knows nothing about which namespace is current; every call names one.
pub trait CacheStorage: Send + Sync {
  /// Create a namespace if it does not exist yet.
  fn create_namespace(&self, namespace: &str) -> Result<()>;

  /// All namespace identifiers, oldest first.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Mark a namespace as the one serving fetches, clearing any previous mark.
  fn set_active(&self, namespace: &str) -> Result<()>;

  /// The namespace last marked active, if it still exists.
  fn active_namespace(&self) -> Result<Option<String>>;

  /// Delete a namespace and all of its entries. Returns whether it existed.
  fn delete_namespace(&self, namespace: &str) -> Result<bool>;

  /// Store a snapshot, overwriting any existing entry for the key.
  fn put(&self, namespace: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()>;

  /// Store several snapshots atomically.
  fn put_all(&self, namespace: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// Get the snapshot stored under a key.
  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries
   (namespace, request_key, method, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))";

const ENSURE_NAMESPACE: &str = "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)";

fn insert_entry(
  conn: &rusqlite::Connection,
  namespace: &str,
  key: &RequestKey,
  response: &ResponseSnapshot,
) -> Result<()> {
  let headers = serde_json::to_vec(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        namespace,
        key.cache_hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry for {}: {}", key.url(), e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn create_namespace(&self, namespace: &str) -> Result<()> {
    self
      .db
      .lock()?
      .execute(ENSURE_NAMESPACE, params![namespace])
      .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;
    Ok(())
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;

    Ok(names)
  }

  fn set_active(&self, namespace: &str) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(ENSURE_NAMESPACE, params![namespace])
      .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;
    tx.execute(
      "UPDATE cache_namespaces SET active = (name = ?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to activate namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn active_namespace(&self) -> Result<Option<String>> {
    self
      .db
      .lock()?
      .query_row(
        "SELECT name FROM cache_namespaces WHERE active = 1 LIMIT 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query active namespace: {}", e))
  }

  fn delete_namespace(&self, namespace: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE namespace = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, namespace: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(ENSURE_NAMESPACE, params![namespace])
      .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;
    insert_entry(&conn, namespace, key, response)
  }

  fn put_all(&self, namespace: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(ENSURE_NAMESPACE, params![namespace])
      .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;

    for (key, response) in entries {
      insert_entry(&tx, namespace, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.db.lock()?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE namespace = ? AND request_key = ?",
        params![namespace, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry for {}: {}", key.url(), e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: Headers = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;

        Ok(Some(CachedEntry {
          response: ResponseSnapshot {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap())
  }

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://feedme.test").unwrap().join(path).unwrap();
    RequestKey::new("GET", &url)
  }

  #[test]
  fn test_put_then_get_round_trip() {
    let storage = storage();
    let response = ResponseSnapshot::new(200)
      .with_header("content-type", "text/css")
      .with_body(vec![0u8, 159, 146, 150]);

    storage.put("v1", &key("/assets/app.css"), &response).unwrap();

    let cached = storage.get("v1", &key("/assets/app.css")).unwrap().unwrap();
    assert_eq!(cached.response, response);
  }

  #[test]
  fn test_put_overwrites_existing_entry() {
    let storage = storage();
    storage
      .put("v1", &key("/"), &ResponseSnapshot::new(200).with_body("old"))
      .unwrap();
    storage
      .put("v1", &key("/"), &ResponseSnapshot::new(200).with_body("new"))
      .unwrap();

    let cached = storage.get("v1", &key("/")).unwrap().unwrap();
    assert_eq!(cached.response.body, b"new");
  }

  #[test]
  fn test_namespaces_are_isolated() {
    let storage = storage();
    storage.put("v1", &key("/"), &ResponseSnapshot::new(200)).unwrap();

    assert!(storage.get("v2", &key("/")).unwrap().is_none());
    assert!(storage.get("v1", &key("/lists")).unwrap().is_none());
  }

  #[test]
  fn test_delete_namespace_removes_entries() {
    let storage = storage();
    storage.put("v1", &key("/"), &ResponseSnapshot::new(200)).unwrap();
    storage.create_namespace("v2").unwrap();

    assert!(storage.delete_namespace("v1").unwrap());
    assert!(!storage.delete_namespace("v1").unwrap());
    assert!(storage.get("v1", &key("/")).unwrap().is_none());
    assert_eq!(storage.namespaces().unwrap(), vec!["v2".to_string()]);
  }

  #[test]
  fn test_active_mark_moves_between_namespaces() {
    let storage = storage();
    assert_eq!(storage.active_namespace().unwrap(), None);

    storage.put("v1", &key("/"), &ResponseSnapshot::new(200)).unwrap();
    storage.set_active("v1").unwrap();
    storage.create_namespace("v2").unwrap();
    assert_eq!(storage.active_namespace().unwrap().as_deref(), Some("v1"));

    storage.set_active("v2").unwrap();
    assert_eq!(storage.active_namespace().unwrap().as_deref(), Some("v2"));

    storage.delete_namespace("v2").unwrap();
    assert_eq!(storage.active_namespace().unwrap(), None);
  }

  #[test]
  fn test_put_all_creates_namespace() {
    let storage = storage();
    let entries = vec![
      (key("/"), ResponseSnapshot::new(200).with_body("shell")),
      (key("/assets/app.js"), ResponseSnapshot::new(200).with_body("js")),
    ];
    storage.put_all("v3", &entries).unwrap();

    assert_eq!(storage.namespaces().unwrap(), vec!["v3".to_string()]);
    assert!(storage.get("v3", &key("/assets/app.js")).unwrap().is_some());
  }
}
