//! ClickHouse schema definitions
//!
//! Spans are split in two tables:
//! - `spans_series`: one row per span, tags referenced by `series_id`
//! - `spans_meta`: one row per tag of each distinct series, written once

use crate::core::config::ClickhouseConfig;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

pub const SERIES_TABLE: &str = "spans_series";

pub const META_TABLE: &str = "spans_meta";

pub fn schema_version_table() -> String {
    r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id UInt8,
    version Int32,
    applied_at Int64,
    description Nullable(String)
) ENGINE = ReplacingMergeTree()
ORDER BY id
"#
    .to_string()
}

fn spans_series_table(ttl_days: u32) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {SERIES_TABLE} (
    org_name            LowCardinality(String),
    series_id           UInt64,
    trace_id            String,
    span_id             String,
    parent_span_id      String,
    operation_name      LowCardinality(String),
    start_time          Int64,
    end_time            Int64,
    timestamp           DateTime64(9, 'UTC'),

    INDEX idx_trace_id trace_id TYPE bloom_filter(0.01) GRANULARITY 4
) ENGINE = MergeTree()
PARTITION BY toYYYYMMDD(timestamp)
ORDER BY (org_name, trace_id, start_time)
TTL toDateTime(timestamp) + INTERVAL {ttl_days} DAY DELETE
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1
"#
    )
}

fn spans_meta_table() -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {META_TABLE} (
    org_name            LowCardinality(String),
    series_id           UInt64,
    key                 LowCardinality(String),
    value               String,
    create_at           DateTime64(6, 'UTC')
) ENGINE = ReplacingMergeTree(create_at)
ORDER BY (org_name, series_id, key)
"#
    )
}

/// All DDL statements for a fresh database, in creation order
pub fn generate_schema(config: &ClickhouseConfig) -> Vec<String> {
    vec![
        schema_version_table(),
        spans_series_table(config.ttl_days),
        spans_meta_table(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl_days: u32) -> ClickhouseConfig {
        ClickhouseConfig {
            url: "http://localhost:8123".to_string(),
            database: "tracehouse".to_string(),
            user: None,
            password: None,
            compression: true,
            ttl_days,
            workers: 2,
            max_in_flight: 4,
            max_retries: 3,
            retry_base_ms: 200,
            retry_max_ms: 5_000,
        }
    }

    #[test]
    fn test_generate_schema_order() {
        let statements = generate_schema(&config(7));
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("schema_version"));
        assert!(statements[1].contains("CREATE TABLE IF NOT EXISTS spans_series"));
        assert!(statements[2].contains("CREATE TABLE IF NOT EXISTS spans_meta"));
    }

    #[test]
    fn test_series_table_partitioning_and_ttl() {
        let sql = spans_series_table(30);
        assert!(sql.contains("PARTITION BY toYYYYMMDD(timestamp)"));
        assert!(sql.contains("ORDER BY (org_name, trace_id, start_time)"));
        assert!(sql.contains("INTERVAL 30 DAY"));
        assert!(sql.contains("DateTime64(9, 'UTC')"));
    }

    #[test]
    fn test_meta_table_deduplicates_by_series_key() {
        let sql = spans_meta_table();
        assert!(sql.contains("ReplacingMergeTree"));
        assert!(sql.contains("ORDER BY (org_name, series_id, key)"));
    }
}
