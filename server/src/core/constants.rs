// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Tracehouse";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".tracehouse";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tracehouse.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TRACEHOUSE_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

pub const ENV_HOST: &str = "TRACEHOUSE_HOST";

pub const ENV_PORT: &str = "TRACEHOUSE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TRACEHOUSE_LOG";

/// Emit logs as JSON lines
pub const ENV_LOG_JSON: &str = "TRACEHOUSE_LOG_JSON";

// =============================================================================
// Server Defaults
// =============================================================================

pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const DEFAULT_PORT: u16 = 7070;

/// Default log filter when neither TRACEHOUSE_LOG nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "info,tracehouse=info";

/// Request body limit for ingest and debug endpoints
pub const DEFAULT_BODY_LIMIT: usize = 8 * 1024 * 1024;

// =============================================================================
// Environment Variables - Storage
// =============================================================================

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "TRACEHOUSE_DATA_DIR";

// =============================================================================
// SQLite (debug request history)
// =============================================================================

pub const SQLITE_DB_FILENAME: &str = "tracehouse.db";

pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

pub const SQLITE_CACHE_SIZE: &str = "-16000";

pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Message Bus
// =============================================================================

pub const ENV_BUS_BACKEND: &str = "TRACEHOUSE_BUS_BACKEND";

pub const ENV_BUS_REDIS_URL: &str = "TRACEHOUSE_BUS_REDIS_URL";

/// Default span topic
pub const DEFAULT_SPAN_TOPIC: &str = "spans";

/// Default consumer group shared by every ingest worker
pub const DEFAULT_CONSUMER_GROUP: &str = "tracehouse-ingest";

// =============================================================================
// Ingest Pipeline
// =============================================================================

pub const ENV_INGEST_ENABLED: &str = "TRACEHOUSE_INGEST_ENABLED";

pub const ENV_INGEST_PARALLELISM: &str = "TRACEHOUSE_INGEST_PARALLELISM";

pub const DEFAULT_INGEST_PARALLELISM: usize = 2;

/// Records per read batch
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 512;

/// Batches buffered between the reader and writer stages
pub const DEFAULT_INGEST_BUFFER_SIZE: usize = 16;

/// Upper bound on how long a read batch stays open
pub const DEFAULT_INGEST_READ_TIMEOUT_MS: u64 = 1000;

/// Pause after a read error before the worker retries
pub const INGEST_READ_ERROR_BACKOFF_MS: u64 = 500;

/// How often a worker claims records left pending by dead consumers
pub const INGEST_CLAIM_INTERVAL_SECS: u64 = 30;

/// Pending time after which a record may be claimed
pub const INGEST_CLAIM_MIN_IDLE_MS: u64 = 60_000;

/// Scope metadata cache TTL
pub const DEFAULT_METADATA_TTL_SECS: u64 = 300;

// =============================================================================
// Cassandra
// =============================================================================

pub const ENV_CASSANDRA_HOSTS: &str = "TRACEHOUSE_CASSANDRA_HOSTS";

pub const DEFAULT_CASSANDRA_KEYSPACE: &str = "tracehouse";

pub const DEFAULT_CASSANDRA_REPLICATION_FACTOR: u32 = 1;

/// Span TTL, 7 days
pub const DEFAULT_CASSANDRA_TTL_SECS: u32 = 7 * 24 * 3600;

/// Tombstone grace period, 1 day
pub const DEFAULT_CASSANDRA_GC_GRACE_SECS: u32 = 24 * 3600;

// =============================================================================
// ClickHouse
// =============================================================================

pub const ENV_CLICKHOUSE_URL: &str = "TRACEHOUSE_CLICKHOUSE_URL";

pub const DEFAULT_CLICKHOUSE_DATABASE: &str = "tracehouse";

pub const DEFAULT_CLICKHOUSE_TTL_DAYS: u32 = 7;

/// Concurrent inserts across all batch workers
pub const DEFAULT_CLICKHOUSE_MAX_IN_FLIGHT: usize = 4;

pub const DEFAULT_CLICKHOUSE_MAX_RETRIES: u32 = 3;

pub const DEFAULT_CLICKHOUSE_RETRY_BASE_MS: u64 = 200;

pub const DEFAULT_CLICKHOUSE_RETRY_MAX_MS: u64 = 5_000;

/// Batches queued for the pool before writers wait
pub const CLICKHOUSE_QUEUE_CAPACITY: usize = 64;

pub const CLICKHOUSE_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

// =============================================================================
// Elasticsearch
// =============================================================================

pub const ENV_ELASTICSEARCH_URL: &str = "TRACEHOUSE_ELASTICSEARCH_URL";

pub const DEFAULT_ELASTICSEARCH_INDEX_PREFIX: &str = "spans";

pub const DEFAULT_ELASTICSEARCH_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Query
// =============================================================================

/// Span limit cap (and default) for trace reconstruction
pub const MAX_SPAN_LIMIT: i64 = 10_000;

pub const DEFAULT_TRACE_LIMIT: i64 = 100;

pub const MAX_TRACE_LIMIT: i64 = 1_000;

/// Default trace search window when start/end are omitted, 1 hour in ms
pub const DEFAULT_TRACE_WINDOW_MS: i64 = 3_600_000;

/// Cursor page size used by the storage backends
pub const STORAGE_PAGE_SIZE: usize = 1_000;

pub const ENV_METRICS_QUERY_URL: &str = "TRACEHOUSE_METRICS_QUERY_URL";

pub const DEFAULT_METRICS_QUERY_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Debug Requests
// =============================================================================

/// Request id header injected into debug requests
pub const HEADER_REQUEST_ID: &str = "terminus-request-id";

/// Sampling header injected into debug requests
pub const HEADER_REQUEST_SAMPLED: &str = "terminus-request-sampled";

pub const DEFAULT_DEBUG_NAME: &str = "no name";

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;

pub const MAX_HISTORY_LIMIT: i64 = 200;

/// A debug request still waiting for spans after this long has failed
pub const DEBUG_TIMEOUT_SECS: u64 = 20 * 60;

pub const DEFAULT_DEBUG_HTTP_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// Shutdown
// =============================================================================

/// Time registered tasks get to finish after the shutdown signal
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 15;
