//! SQLite schema definition

/// SQL schema for the local storage database
pub const SCHEMA_SQL: &str = r#"
-- Local storage: flat string key/value pairs (session credential, preferences,
-- per-lead chat session ids)
CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_local_storage_updated ON local_storage(updated_at);
"#;
