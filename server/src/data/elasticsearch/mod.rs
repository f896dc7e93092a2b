//! Elasticsearch span backend
//!
//! Spans are indexed daily per scope as `{prefix}-{scope}-{yyyyMMdd}`. Reads
//! search across the matching indices with `search_after` keyset paging.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::config::ElasticsearchConfig;
use crate::core::constants::STORAGE_PAGE_SIZE;
use crate::data::cursor::{Direction, PageKey, PageSource, PagedIterator};
use crate::data::error::StorageError;
use crate::data::traits::{Hint, Selector, SpanIterator, SpanStorage, SpanWriter};
use crate::domain::span::Span;
use crate::utils::time::{millis_to_day, nanos_to_day};

const BACKEND: &str = "elasticsearch";

/// Scope segment for spans carrying no scope tag
const UNSCOPED: &str = "unknown";

/// Item errors quoted in a bulk failure
const MAX_REPORTED_ITEM_ERRORS: usize = 3;

/// Index names are lowercase without separators or wildcards
fn sanitize_scope(scope: &str) -> String {
    scope
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9' | '_') => c,
            _ => '_',
        })
        .collect()
}

/// Daily write index of a span
pub fn index_name(prefix: &str, span: &Span) -> String {
    let scope = span.scope().map_or_else(|| UNSCOPED.to_string(), sanitize_scope);
    format!("{prefix}-{scope}-{}", nanos_to_day(span.start_time))
}

/// Index pattern narrowed by whatever the hint carries
pub fn search_pattern(prefix: &str, hint: &Hint) -> String {
    let scope = hint.scope.as_deref().map(sanitize_scope);
    let day = hint.timestamp_ms.map(millis_to_day);
    match (scope, day) {
        (Some(scope), Some(day)) => format!("{prefix}-{scope}-{day}"),
        (Some(scope), None) => format!("{prefix}-{scope}-*"),
        (None, Some(day)) => format!("{prefix}-*-{day}"),
        (None, None) => format!("{prefix}-*"),
    }
}

fn document_id(span: &Span) -> String {
    format!("{}:{}", span.trace_id, span.span_id)
}

/// NDJSON body of a `_bulk` index request
pub fn bulk_body(prefix: &str, spans: &[Span]) -> Result<String, StorageError> {
    let mut body = String::new();
    for span in spans {
        let action = json!({ "index": { "_index": index_name(prefix, span), "_id": document_id(span) } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(span)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

/// Turn item-level failures of a bulk response into an error
fn check_bulk(response: BulkResponse) -> Result<(), StorageError> {
    if !response.errors {
        return Ok(());
    }
    let failures: Vec<(u16, String)> = response
        .items
        .iter()
        .filter_map(|item| item.get("index"))
        .filter(|result| result.get("error").is_some())
        .map(|result| {
            let status = result
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(500);
            let reason = result["error"]
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            (status, reason)
        })
        .collect();

    let Some((status, _)) = failures.first() else {
        return Ok(());
    };
    let reasons: Vec<&str> = failures
        .iter()
        .take(MAX_REPORTED_ITEM_ERRORS)
        .map(|(_, reason)| reason.as_str())
        .collect();
    Err(StorageError::Elasticsearch {
        status: *status,
        reason: format!(
            "{} of {} bulk items failed: {}",
            failures.len(),
            response.items.len(),
            reasons.join("; ")
        ),
    })
}

fn trace_query(trace_id: &str) -> Value {
    json!({ "term": { "trace_id": trace_id } })
}

pub fn search_body(
    trace_id: &str,
    direction: Direction,
    after: Option<&PageKey>,
    size: usize,
) -> Value {
    let order = match direction {
        Direction::Forward => "asc",
        Direction::Backward => "desc",
    };
    let mut body = json!({
        "size": size,
        "query": trace_query(trace_id),
        "sort": [{ "start_time": order }, { "span_id": order }],
    });
    if let Some(key) = after {
        body["search_after"] = json!([key.start_time, key.span_id]);
    }
    body
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: Span,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: i64,
}

fn index_template(prefix: &str) -> Value {
    json!({
        "index_patterns": [format!("{prefix}-*")],
        "template": {
            "mappings": {
                "dynamic_templates": [{
                    "tags_as_keywords": {
                        "path_match": "tags.*",
                        "mapping": { "type": "keyword" }
                    }
                }],
                "properties": {
                    "trace_id": { "type": "keyword" },
                    "span_id": { "type": "keyword" },
                    "parent_span_id": { "type": "keyword" },
                    "operation_name": { "type": "keyword" },
                    "start_time": { "type": "long" },
                    "end_time": { "type": "long" },
                    "tags": { "type": "object" }
                }
            }
        }
    })
}

/// HTTP plumbing shared by the service, writers and cursors
#[derive(Clone)]
struct EsClient {
    http: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: u64,
}

impl EsClient {
    fn url(&self, path: &[&str], search: bool) -> Result<Url, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Config(format!("Invalid Elasticsearch URL: {}", self.base)))?
            .pop_if_empty()
            .extend(path);
        if search {
            url.query_pairs_mut()
                .append_pair("ignore_unavailable", "true")
                .append_pair("allow_no_indices", "true");
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StorageError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                StorageError::timeout(BACKEND, self.timeout_secs)
            } else {
                StorageError::Http(e)
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = response.text().await.unwrap_or_default();
        Err(StorageError::Elasticsearch {
            status: status.as_u16(),
            reason,
        })
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &[&str],
        body: &Value,
    ) -> Result<T, StorageError> {
        let url = self.url(path, true)?;
        let response = self.send(self.http.post(url).json(body)).await?;
        Ok(response.json().await?)
    }
}

pub struct ElasticsearchService {
    client: EsClient,
    prefix: String,
}

impl ElasticsearchService {
    /// Build the client and install the index template (best effort)
    pub async fn init(config: &ElasticsearchConfig) -> Result<Self, StorageError> {
        let base = Url::parse(&config.url).map_err(|e| {
            StorageError::Config(format!("Invalid Elasticsearch URL '{}': {}", config.url, e))
        })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let service = Self {
            client: EsClient {
                http,
                base,
                username: config.username.clone(),
                password: config.password.clone(),
                timeout_secs: config.timeout_secs,
            },
            prefix: config.index_prefix.clone(),
        };

        if let Err(e) = service.install_template().await {
            tracing::warn!(error = %e, prefix = %service.prefix, "Failed to install Elasticsearch index template");
        }

        tracing::debug!(
            url = %config.url,
            prefix = %config.index_prefix,
            "ElasticsearchService initialized"
        );
        Ok(service)
    }

    async fn install_template(&self) -> Result<(), StorageError> {
        let url = self.client.url(&["_index_template", self.prefix.as_str()], false)?;
        self.client
            .send(self.client.http.put(url).json(&index_template(&self.prefix)))
            .await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StorageError> {
        let url = self.client.url(&["_cluster", "health"], false)?;
        self.client.send(self.client.http.get(url)).await?;
        Ok(())
    }
}

#[async_trait]
impl SpanStorage for ElasticsearchService {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn new_writer(&self) -> Result<Box<dyn SpanWriter>, StorageError> {
        Ok(Box::new(ElasticsearchSpanWriter {
            client: self.client.clone(),
            prefix: self.prefix.clone(),
            buffer: Vec::new(),
            closed: false,
        }))
    }

    async fn iterator(&self, selector: &Selector) -> Result<Box<dyn SpanIterator>, StorageError> {
        Ok(Box::new(PagedIterator::new(
            ElasticsearchPageSource {
                client: self.client.clone(),
                pattern: search_pattern(&self.prefix, &selector.hint),
                trace_id: selector.trace_id.clone(),
            },
            STORAGE_PAGE_SIZE,
        )))
    }

    async fn count(&self, trace_id: &str) -> Result<i64, StorageError> {
        let pattern = search_pattern(&self.prefix, &Hint::default());
        let response: CountResponse = self
            .client
            .post_json(&[pattern.as_str(), "_count"], &json!({ "query": trace_query(trace_id) }))
            .await?;
        Ok(response.count)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        ElasticsearchService::health_check(self).await
    }
}

struct ElasticsearchSpanWriter {
    client: EsClient,
    prefix: String,
    buffer: Vec<Span>,
    closed: bool,
}

#[async_trait]
impl SpanWriter for ElasticsearchSpanWriter {
    async fn write(&mut self, span: Span) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed("writer"));
        }
        self.buffer.push(span);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let spans = std::mem::take(&mut self.buffer);
        let body = bulk_body(&self.prefix, &spans)?;

        let url = self.client.url(&["_bulk"], false)?;
        let request = self
            .client
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response: BulkResponse = self.client.send(request).await?.json().await?;
        check_bulk(response).inspect_err(|e| {
            tracing::warn!(error = %e, spans = spans.len(), "Elasticsearch bulk write had failures");
        })
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

struct ElasticsearchPageSource {
    client: EsClient,
    pattern: String,
    trace_id: String,
}

#[async_trait]
impl PageSource for ElasticsearchPageSource {
    async fn fetch(
        &mut self,
        direction: Direction,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<Span>, StorageError> {
        let body = search_body(&self.trace_id, direction, after, limit);
        let response: SearchResponse = self
            .client
            .post_json(&[self.pattern.as_str(), "_search"], &body)
            .await?;
        Ok(response.hits.hits.into_iter().map(|hit| hit.source).collect())
    }
}
