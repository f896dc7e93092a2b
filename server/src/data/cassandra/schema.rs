//! Cassandra DDL and statements
//!
//! Spans are partitioned by trace and clustered by start time, so a trace
//! reads as one partition slice in either direction.

use crate::core::config::CassandraConfig;
use crate::data::cursor::Direction;

pub const SPANS_TABLE: &str = "spans";

const COLUMNS: &str = "span_id, parent_span_id, operation_name, start_time, end_time, tags";

pub fn keyspace(config: &CassandraConfig) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
         {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        config.keyspace, config.replication_factor
    )
}

pub fn spans_table(config: &CassandraConfig) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {ks}.{SPANS_TABLE} (
    trace_id text,
    start_time bigint,
    span_id text,
    end_time bigint,
    parent_span_id text,
    operation_name text,
    tags map<text, text>,
    PRIMARY KEY ((trace_id), start_time, span_id)
) WITH CLUSTERING ORDER BY (start_time DESC, span_id DESC)
  AND compaction = {{'class': 'TimeWindowCompactionStrategy',
                    'compaction_window_unit': 'HOURS', 'compaction_window_size': '4'}}
  AND gc_grace_seconds = {gc_grace}
  AND default_time_to_live = {ttl}
"#,
        ks = config.keyspace,
        gc_grace = config.gc_grace_secs,
        ttl = config.ttl_secs,
    )
}

pub fn insert_span(keyspace: &str) -> String {
    format!(
        "INSERT INTO {keyspace}.{SPANS_TABLE} \
         (trace_id, start_time, span_id, end_time, parent_span_id, operation_name, tags) \
         VALUES (?, ?, ?, ?, ?, ?, ?) USING TTL ?"
    )
}

/// Page query; with `keyset` it binds `(trace_id, start_time, span_id, limit)`,
/// otherwise `(trace_id, limit)`
pub fn select_page(keyspace: &str, direction: Direction, keyset: bool) -> String {
    let order = direction.sql_order();
    let boundary = if keyset {
        format!(" AND (start_time, span_id) {} (?, ?)", direction.sql_cmp())
    } else {
        String::new()
    };
    format!(
        "SELECT {COLUMNS} FROM {keyspace}.{SPANS_TABLE} WHERE trace_id = ?{boundary} \
         ORDER BY start_time {order}, span_id {order} LIMIT ?"
    )
}

pub fn count_spans(keyspace: &str) -> String {
    format!("SELECT COUNT(*) FROM {keyspace}.{SPANS_TABLE} WHERE trace_id = ?")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CassandraConfig {
        CassandraConfig {
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "tracehouse".to_string(),
            replication_factor: 3,
            username: None,
            password: None,
            ttl_secs: 604_800,
            gc_grace_secs: 86_400,
        }
    }

    #[test]
    fn test_keyspace_replication() {
        assert_eq!(
            keyspace(&config()),
            "CREATE KEYSPACE IF NOT EXISTS tracehouse WITH replication = \
             {'class': 'SimpleStrategy', 'replication_factor': 3}"
        );
    }

    #[test]
    fn test_spans_table_retention() {
        let ddl = spans_table(&config());
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS tracehouse.spans"));
        assert!(ddl.contains("PRIMARY KEY ((trace_id), start_time, span_id)"));
        assert!(ddl.contains("CLUSTERING ORDER BY (start_time DESC, span_id DESC)"));
        assert!(ddl.contains("TimeWindowCompactionStrategy"));
        assert!(ddl.contains("gc_grace_seconds = 86400"));
        assert!(ddl.contains("default_time_to_live = 604800"));
    }

    #[test]
    fn test_insert_carries_ttl() {
        assert!(insert_span("ks").ends_with("VALUES (?, ?, ?, ?, ?, ?, ?) USING TTL ?"));
    }

    #[test]
    fn test_page_queries() {
        assert_eq!(
            select_page("ks", Direction::Forward, false),
            "SELECT span_id, parent_span_id, operation_name, start_time, end_time, tags \
             FROM ks.spans WHERE trace_id = ? ORDER BY start_time ASC, span_id ASC LIMIT ?"
        );
        let backward = select_page("ks", Direction::Backward, true);
        assert!(backward.contains("WHERE trace_id = ? AND (start_time, span_id) < (?, ?)"));
        assert!(backward.ends_with("ORDER BY start_time DESC, span_id DESC LIMIT ?"));
    }
}
