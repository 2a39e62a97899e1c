/// Schema for the cache namespaces, cache entries and the pending action queue.
pub const SCHEMA: &str = r#"
-- One row per cache generation; at most one is active (serving fetches)
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by normalized request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, request_key)
);

-- Mutating requests awaiting replay; AUTOINCREMENT keeps ids monotonic
CREATE TABLE IF NOT EXISTS pending_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers BLOB NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
