//! Span reads from the series/meta tables

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::Deserialize;

use super::error::ClickhouseError;
use super::schema::{META_TABLE, SERIES_TABLE};
use crate::data::cursor::{Direction, PageKey, PageSource};
use crate::data::error::StorageError;
use crate::domain::span::Span;

#[derive(Debug, Row, Deserialize)]
struct SpanSeriesRow {
    series_id: u64,
    span_id: String,
    parent_span_id: String,
    operation_name: String,
    start_time: i64,
    end_time: i64,
}

#[derive(Debug, Row, Deserialize)]
struct SeriesTagRow {
    series_id: u64,
    key: String,
    value: String,
}

fn page_query(direction: Direction, keyset: bool) -> String {
    let order = direction.sql_order();
    let mut sql = format!(
        "SELECT series_id, span_id, parent_span_id, operation_name, start_time, end_time \
         FROM {SERIES_TABLE} WHERE trace_id = ?"
    );
    if keyset {
        sql.push_str(&format!(
            " AND (start_time, span_id) {} (?, ?)",
            direction.sql_cmp()
        ));
    }
    sql.push_str(&format!(
        " ORDER BY start_time {order}, span_id {order} LIMIT ?"
    ));
    sql
}

/// Pages the spans of one trace, resolving tag sets per page
pub struct ClickhousePageSource {
    client: Client,
    trace_id: String,
}

impl ClickhousePageSource {
    pub fn new(client: Client, trace_id: impl Into<String>) -> Self {
        Self {
            client,
            trace_id: trace_id.into(),
        }
    }
}

#[async_trait]
impl PageSource for ClickhousePageSource {
    async fn fetch(
        &mut self,
        direction: Direction,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<Span>, StorageError> {
        let sql = page_query(direction, after.is_some());
        let mut query = self.client.query(&sql).bind(&self.trace_id);
        if let Some(key) = after {
            query = query.bind(key.start_time).bind(&key.span_id);
        }
        let rows: Vec<SpanSeriesRow> = query
            .bind(limit as u64)
            .fetch_all()
            .await
            .map_err(ClickhouseError::from)?;

        let ids: Vec<u64> = rows
            .iter()
            .map(|row| row.series_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let tag_sets = load_tag_sets(&self.client, &ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| Span {
                trace_id: self.trace_id.clone(),
                span_id: row.span_id,
                parent_span_id: row.parent_span_id,
                operation_name: row.operation_name,
                start_time: row.start_time,
                end_time: row.end_time,
                tags: tag_sets.get(&row.series_id).cloned().unwrap_or_default(),
            })
            .collect())
    }
}

/// Tag maps for a set of series ids
pub async fn load_tag_sets(
    client: &Client,
    ids: &[u64],
) -> Result<HashMap<u64, HashMap<String, String>>, ClickhouseError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<SeriesTagRow> = client
        .query(&format!(
            "SELECT series_id, key, value FROM {META_TABLE} WHERE has(?, series_id)"
        ))
        .bind(ids)
        .fetch_all()
        .await?;

    Ok(group_tag_rows(
        rows.into_iter().map(|row| (row.series_id, row.key, row.value)),
    ))
}

/// Fold `(series_id, key, value)` meta rows into one tag map per series
///
/// A series may have its meta rows written more than once when two
/// workers miss the cache together; the repeats collapse.
fn group_tag_rows(
    rows: impl IntoIterator<Item = (u64, String, String)>,
) -> HashMap<u64, HashMap<String, String>> {
    let mut sets: HashMap<u64, HashMap<String, String>> = HashMap::new();
    for (series_id, key, value) in rows {
        sets.entry(series_id).or_default().insert(key, value);
    }
    sets
}

pub async fn count_spans(client: &Client, trace_id: &str) -> Result<u64, ClickhouseError> {
    let count: u64 = client
        .query(&format!(
            "SELECT count() FROM {SERIES_TABLE} WHERE trace_id = ?"
        ))
        .bind(trace_id)
        .fetch_one()
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::clickhouse::series::SeriesCache;
    use crate::data::clickhouse::writer::EncodedBatch;

    fn meta_rows(batch: &EncodedBatch) -> Vec<(u64, String, String)> {
        batch
            .meta
            .iter()
            .map(|row| (row.series_id, row.key.clone(), row.value.clone()))
            .collect()
    }

    fn span(span_id: &str, tags: &[(&str, &str)]) -> Span {
        Span {
            trace_id: "trace-1".into(),
            span_id: span_id.into(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_meta_rows_rebuild_written_tags() {
        let api = span("a", &[("org_name", "erda"), ("service_name", "api"), ("scope", "s1")]);
        let db = span("b", &[("org_name", "erda"), ("service_name", "db")]);
        let batch = EncodedBatch::encode(vec![api.clone(), db.clone()], &SeriesCache::new());

        let sets = group_tag_rows(meta_rows(&batch));
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[&batch.series[0].series_id], api.tags);
        assert_eq!(sets[&batch.series[1].series_id], db.tags);
    }

    #[test]
    fn test_empty_tag_set_reads_back_empty() {
        let bare = span("a", &[]);
        let batch = EncodedBatch::encode(vec![bare.clone()], &SeriesCache::new());
        assert!(batch.meta.is_empty());

        let sets = group_tag_rows(meta_rows(&batch));
        let tags = sets
            .get(&batch.series[0].series_id)
            .cloned()
            .unwrap_or_default();
        assert_eq!(tags, bare.tags);
    }

    #[test]
    fn test_repeated_meta_rows_collapse() {
        let api = span("a", &[("org_name", "erda"), ("service_name", "api")]);
        let first = EncodedBatch::encode(vec![api.clone()], &SeriesCache::new());
        let second = EncodedBatch::encode(vec![api.clone()], &SeriesCache::new());

        let mut rows = meta_rows(&first);
        rows.extend(meta_rows(&second));
        assert_eq!(rows.len(), 4);

        let sets = group_tag_rows(rows);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[&first.series[0].series_id], api.tags);
    }

    #[test]
    fn test_first_page_query() {
        let sql = page_query(Direction::Forward, false);
        assert!(sql.contains("FROM spans_series WHERE trace_id = ?"));
        assert!(!sql.contains("(start_time, span_id)"));
        assert!(sql.ends_with("ORDER BY start_time ASC, span_id ASC LIMIT ?"));
    }

    #[test]
    fn test_keyset_page_query_follows_direction() {
        let forward = page_query(Direction::Forward, true);
        assert!(forward.contains("AND (start_time, span_id) > (?, ?)"));

        let backward = page_query(Direction::Backward, true);
        assert!(backward.contains("AND (start_time, span_id) < (?, ?)"));
        assert!(backward.ends_with("ORDER BY start_time DESC, span_id DESC LIMIT ?"));
    }
}
