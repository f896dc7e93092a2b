//! Cassandra span backend
//!
//! One partition per trace, clustered by `(start_time, span_id)`. Retention
//! is enforced per write with `USING TTL` and by the table's default TTL.

pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::statement::batch::{Batch, BatchType};
use scylla::statement::prepared::PreparedStatement;

use crate::core::config::CassandraConfig;
use crate::core::constants::STORAGE_PAGE_SIZE;
use crate::data::cursor::{Direction, PageKey, PageSource, PagedIterator};
use crate::data::error::StorageError;
use crate::data::traits::{Selector, SpanIterator, SpanStorage, SpanWriter};
use crate::domain::span::Span;

/// Statements per unlogged batch
const BATCH_CHUNK: usize = 100;

type SpanValues = (
    String,
    i64,
    String,
    i64,
    String,
    String,
    HashMap<String, String>,
    i32,
);

type SpanRow = (
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    Option<HashMap<String, String>>,
);

fn span_values(span: Span, ttl: i32) -> SpanValues {
    (
        span.trace_id,
        span.start_time,
        span.span_id,
        span.end_time,
        span.parent_span_id,
        span.operation_name,
        span.tags,
        ttl,
    )
}

fn row_to_span(trace_id: &str, row: SpanRow) -> Span {
    let (span_id, parent_span_id, operation_name, start_time, end_time, tags) = row;
    Span {
        trace_id: trace_id.to_string(),
        span_id,
        parent_span_id: parent_span_id.unwrap_or_default(),
        operation_name: operation_name.unwrap_or_default(),
        start_time,
        end_time,
        tags: tags.unwrap_or_default(),
    }
}

struct Statements {
    insert: PreparedStatement,
    count: PreparedStatement,
    forward_first: PreparedStatement,
    forward_after: PreparedStatement,
    backward_first: PreparedStatement,
    backward_after: PreparedStatement,
}

impl Statements {
    async fn prepare(session: &Session, keyspace: &str) -> Result<Self, StorageError> {
        let prepare = |cql: String| async move {
            session.prepare(cql).await.map_err(StorageError::cassandra)
        };
        Ok(Self {
            insert: prepare(schema::insert_span(keyspace)).await?,
            count: prepare(schema::count_spans(keyspace)).await?,
            forward_first: prepare(schema::select_page(keyspace, Direction::Forward, false)).await?,
            forward_after: prepare(schema::select_page(keyspace, Direction::Forward, true)).await?,
            backward_first: prepare(schema::select_page(keyspace, Direction::Backward, false))
                .await?,
            backward_after: prepare(schema::select_page(keyspace, Direction::Backward, true))
                .await?,
        })
    }

    fn page(&self, direction: Direction, keyset: bool) -> &PreparedStatement {
        match (direction, keyset) {
            (Direction::Forward, false) => &self.forward_first,
            (Direction::Forward, true) => &self.forward_after,
            (Direction::Backward, false) => &self.backward_first,
            (Direction::Backward, true) => &self.backward_after,
        }
    }
}

pub struct CassandraService {
    session: Arc<Session>,
    statements: Arc<Statements>,
    ttl_secs: i32,
}

impl CassandraService {
    /// Connect, create keyspace and table, prepare statements
    pub async fn init(config: &CassandraConfig) -> Result<Self, StorageError> {
        let mut builder = SessionBuilder::new().known_nodes(&config.hosts);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.user(user, password);
        }
        let session = builder.build().await.map_err(StorageError::cassandra)?;

        session
            .query_unpaged(schema::keyspace(config), ())
            .await
            .map_err(StorageError::cassandra)?;
        session
            .query_unpaged(schema::spans_table(config), ())
            .await
            .map_err(StorageError::cassandra)?;

        let statements = Statements::prepare(&session, &config.keyspace).await?;

        tracing::debug!(
            hosts = ?config.hosts,
            keyspace = %config.keyspace,
            ttl_secs = config.ttl_secs,
            "CassandraService initialized"
        );

        Ok(Self {
            session: Arc::new(session),
            statements: Arc::new(statements),
            ttl_secs: i32::try_from(config.ttl_secs).unwrap_or(i32::MAX),
        })
    }

    pub async fn health_check(&self) -> Result<(), StorageError> {
        self.session
            .query_unpaged("SELECT release_version FROM system.local", ())
            .await
            .map_err(StorageError::cassandra)?;
        Ok(())
    }
}

#[async_trait]
impl SpanStorage for CassandraService {
    fn name(&self) -> &'static str {
        "cassandra"
    }

    async fn new_writer(&self) -> Result<Box<dyn SpanWriter>, StorageError> {
        Ok(Box::new(CassandraSpanWriter {
            session: Arc::clone(&self.session),
            insert: self.statements.insert.clone(),
            ttl_secs: self.ttl_secs,
            buffer: Vec::new(),
            closed: false,
        }))
    }

    async fn iterator(&self, selector: &Selector) -> Result<Box<dyn SpanIterator>, StorageError> {
        Ok(Box::new(PagedIterator::new(
            CassandraPageSource {
                session: Arc::clone(&self.session),
                statements: Arc::clone(&self.statements),
                trace_id: selector.trace_id.clone(),
            },
            STORAGE_PAGE_SIZE,
        )))
    }

    async fn count(&self, trace_id: &str) -> Result<i64, StorageError> {
        let (count,) = self
            .session
            .execute_unpaged(&self.statements.count, (trace_id.to_string(),))
            .await
            .map_err(StorageError::cassandra)?
            .into_rows_result()
            .map_err(StorageError::cassandra)?
            .first_row::<(i64,)>()
            .map_err(StorageError::cassandra)?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        CassandraService::health_check(self).await
    }
}

struct CassandraSpanWriter {
    session: Arc<Session>,
    insert: PreparedStatement,
    ttl_secs: i32,
    buffer: Vec<Span>,
    closed: bool,
}

#[async_trait]
impl SpanWriter for CassandraSpanWriter {
    async fn write(&mut self, span: Span) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed("writer"));
        }
        self.buffer.push(span);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StorageError> {
        let mut spans = std::mem::take(&mut self.buffer).into_iter().peekable();
        while spans.peek().is_some() {
            let values: Vec<SpanValues> = spans
                .by_ref()
                .take(BATCH_CHUNK)
                .map(|span| span_values(span, self.ttl_secs))
                .collect();

            let mut batch = Batch::new(BatchType::Unlogged);
            for _ in &values {
                batch.append_statement(self.insert.clone());
            }
            let rows = values.len();
            self.session
                .batch(&batch, values)
                .await
                .map_err(StorageError::cassandra)?;
            tracing::trace!(rows, "Cassandra batch written");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush().await;
        self.closed = true;
        result
    }
}

struct CassandraPageSource {
    session: Arc<Session>,
    statements: Arc<Statements>,
    trace_id: String,
}

#[async_trait]
impl PageSource for CassandraPageSource {
    async fn fetch(
        &mut self,
        direction: Direction,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<Span>, StorageError> {
        let statement = self.statements.page(direction, after.is_some());
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let result = match after {
            Some(key) => {
                self.session
                    .execute_unpaged(
                        statement,
                        (
                            self.trace_id.clone(),
                            key.start_time,
                            key.span_id.clone(),
                            limit,
                        ),
                    )
                    .await
            }
            None => {
                self.session
                    .execute_unpaged(statement, (self.trace_id.clone(), limit))
                    .await
            }
        }
        .map_err(StorageError::cassandra)?;

        let rows = result.into_rows_result().map_err(StorageError::cassandra)?;
        let spans = rows
            .rows::<SpanRow>()
            .map_err(StorageError::cassandra)?
            .map(|row| {
                row.map(|row| row_to_span(&self.trace_id, row))
                    .map_err(StorageError::cassandra)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_values_column_order() {
        let span = Span {
            trace_id: "t".into(),
            span_id: "s".into(),
            parent_span_id: "p".into(),
            operation_name: "op".into(),
            start_time: 10,
            end_time: 20,
            tags: HashMap::from([("k".to_string(), "v".to_string())]),
        };
        let (trace_id, start, span_id, end, parent, op, tags, ttl) = span_values(span, 3600);
        assert_eq!((trace_id.as_str(), start, span_id.as_str()), ("t", 10, "s"));
        assert_eq!((end, parent.as_str(), op.as_str()), (20, "p", "op"));
        assert_eq!(tags.get("k").map(String::as_str), Some("v"));
        assert_eq!(ttl, 3600);
    }

    #[test]
    fn test_row_to_span_tolerates_nulls() {
        let span = row_to_span("t", ("s".into(), None, None, 1, 2, None));
        assert_eq!(span.trace_id, "t");
        assert!(span.parent_span_id.is_empty());
        assert!(span.operation_name.is_empty());
        assert!(span.tags.is_empty());
    }
}
