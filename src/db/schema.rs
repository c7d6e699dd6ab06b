/// Schema applied every time the database is opened.
pub const SCHEMA: &str = r#"
-- Generic key-value records, one logical table per `tbl`
CREATE TABLE IF NOT EXISTS kv_store (
    tbl TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (tbl, key)
);

-- One row per cache generation (deployed version)
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses, keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);
"#;
