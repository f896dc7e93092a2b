//! SQLite schema definitions
//!
//! Holds the debug request history. `SCHEMA` is always the latest shape;
//! older databases are brought forward by the versioned migrations.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms INTEGER,
    success INTEGER NOT NULL DEFAULT 1
);

-- Replayed debug requests; times are unix milliseconds
CREATE TABLE IF NOT EXISTS trace_request_history (
    scope_id TEXT NOT NULL,
    request_id TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    query_string TEXT NOT NULL DEFAULT '{}',
    header TEXT NOT NULL DEFAULT '{}',
    body TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0,
    response_status INTEGER NOT NULL DEFAULT 0,
    response_body TEXT NOT NULL DEFAULT '',
    create_time INTEGER NOT NULL,
    update_time INTEGER NOT NULL,
    PRIMARY KEY (scope_id, request_id)
);

CREATE INDEX IF NOT EXISTS idx_trace_request_history_created
    ON trace_request_history(scope_id, create_time DESC);
"#;

/// v2: history listing index
pub const MIGRATION_V2: &str = "CREATE INDEX IF NOT EXISTS idx_trace_request_history_created ON trace_request_history(scope_id, create_time DESC)";
