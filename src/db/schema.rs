/// Schema for the on-device database.
pub const SCHEMA: &str = r#"
-- Business records, partitioned by (entity, user). This is the offline
-- source of truth, not a cache.
CREATE TABLE IF NOT EXISTS records (
    entity TEXT NOT NULL,
    user_id TEXT NOT NULL,
    record_id TEXT NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity, user_id, record_id)
);

CREATE INDEX IF NOT EXISTS idx_records_scope
    ON records(entity, user_id);

-- Mutations that could not reach the network, replayed oldest-first.
-- The AUTOINCREMENT id is the replay order key.
CREATE TABLE IF NOT EXISTS pending_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    collection TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    queued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_requests_user
    ON pending_requests(user_id, id);

-- Last-known-good GET responses, keyed by hashed request identity.
-- Invalidation flips `stale`; stale entries still serve offline reads.
CREATE TABLE IF NOT EXISTS read_cache (
    cache_key TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    stale INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_read_cache_scope
    ON read_cache(user_id, collection);

-- The active device identity. At most one row.
CREATE TABLE IF NOT EXISTS identity (
    user_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT,
    business_name TEXT,
    verified INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
"#;
