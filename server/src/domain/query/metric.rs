//! Metrics store access for trace search
//!
//! The store speaks an influx-style result format:
//! `{"results": [{"series": [{"columns": [..], "rows": [[..], ..]}]}]}`.
//! Only the rows of the first series are used.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::error::QueryError;
use super::traces::TraceStatement;
use crate::core::config::MetricsQueryConfig;

/// Executes trace statements against a metrics store
#[async_trait]
pub trait MetricQuery: Send + Sync {
    /// Rows of the first result series, empty when the store returned none
    async fn query(&self, statement: &TraceStatement) -> Result<Vec<Vec<Value>>, QueryError>;
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<QuerySeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuerySeries {
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl QueryResponse {
    fn into_rows(self) -> Vec<Vec<Value>> {
        self.results
            .into_iter()
            .next()
            .and_then(|r| r.series.into_iter().next())
            .map(|s| s.rows)
            .unwrap_or_default()
    }
}

/// Posts statements as JSON to the configured query endpoint
pub struct HttpMetricQuery {
    client: reqwest::Client,
    url: String,
}

impl HttpMetricQuery {
    pub fn new(config: &MetricsQueryConfig) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        tracing::debug!(url = %config.url, "Metrics query client initialized");
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl MetricQuery for HttpMetricQuery {
    async fn query(&self, statement: &TraceStatement) -> Result<Vec<Vec<Value>>, QueryError> {
        let response = self.client.post(&self.url).json(statement).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::MetricQuery(format!(
                "status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        let parsed: QueryResponse = response.json().await?;
        Ok(parsed.into_rows())
    }
}

/// Stand-in used when no metrics store is configured
#[derive(Debug, Default)]
pub struct DisabledMetricQuery;

#[async_trait]
impl MetricQuery for DisabledMetricQuery {
    async fn query(&self, _statement: &TraceStatement) -> Result<Vec<Vec<Value>>, QueryError> {
        Err(QueryError::MetricQueryDisabled)
    }
}
