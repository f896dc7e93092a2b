//! Best-effort scope metadata enrichment
//!
//! Spans carry a scope key (`terminus_key` or `scope_id`). The enricher
//! resolves organization and project metadata for that scope and fills in
//! the corresponding tags. Failures never drop the span.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;

use super::error::IngestError;
use super::metrics::IngestMetrics;
use crate::domain::span::Span;

const CACHE_CAPACITY: u64 = 10_000;

/// Metadata attached to every span of a scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScopeMetadata {
    pub org_id: Option<String>,
    pub org_name: Option<String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub workspace: Option<String>,
    pub cluster_name: Option<String>,
}

impl ScopeMetadata {
    fn tags(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("org_id", &self.org_id),
            ("org_name", &self.org_name),
            ("project_id", &self.project_id),
            ("project_name", &self.project_name),
            ("workspace", &self.workspace),
            ("cluster_name", &self.cluster_name),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
    }
}

/// Resolves metadata for a scope
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` when the scope is unknown
    async fn resolve(&self, scope: &str) -> Result<Option<ScopeMetadata>, IngestError>;
}

/// Metadata source backed by configuration
#[derive(Debug, Default)]
pub struct StaticMetadataSource {
    scopes: HashMap<String, ScopeMetadata>,
}

impl StaticMetadataSource {
    pub fn new(scopes: HashMap<String, ScopeMetadata>) -> Self {
        Self { scopes }
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn resolve(&self, scope: &str) -> Result<Option<ScopeMetadata>, IngestError> {
        Ok(self.scopes.get(scope).cloned())
    }
}

pub struct MetadataEnricher {
    source: Arc<dyn MetadataSource>,
    cache: Cache<String, Option<Arc<ScopeMetadata>>>,
    metrics: IngestMetrics,
}

impl MetadataEnricher {
    pub fn new(source: Arc<dyn MetadataSource>, ttl: Duration, metrics: IngestMetrics) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();
        Self {
            source,
            cache,
            metrics,
        }
    }

    /// Fill missing metadata tags in place
    ///
    /// Existing tags are never overwritten.
    pub async fn process(&self, span: &mut Span) -> Result<(), IngestError> {
        self.apply(span).await.map_err(|f| f.into_error(span))
    }

    /// Enrich, logging and counting failures instead of returning them
    ///
    /// Returns whether metadata was applied.
    pub async fn enrich(&self, span: &mut Span) -> bool {
        match self.apply(span).await {
            Ok(()) => true,
            Err(failure) => {
                self.metrics
                    .metadata_errors
                    .with_label_values(&[failure.reason()])
                    .inc();
                let e = failure.into_error(span);
                tracing::debug!(error = %e, trace_id = %span.trace_id, "Span metadata enrichment failed");
                false
            }
        }
    }

    async fn apply(&self, span: &mut Span) -> Result<(), Failure> {
        let scope = span.scope().map(str::to_string).ok_or(Failure::NoScope)?;

        let metadata = match self.cache.get(&scope).await {
            Some(cached) => cached,
            None => {
                let resolved = self
                    .source
                    .resolve(&scope)
                    .await
                    .map_err(Failure::Source)?
                    .map(Arc::new);
                self.cache.insert(scope.clone(), resolved.clone()).await;
                resolved
            }
        };

        let metadata = metadata.ok_or(Failure::UnknownScope(scope))?;
        for (key, value) in metadata.tags() {
            span.tags
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        Ok(())
    }
}

enum Failure {
    NoScope,
    UnknownScope(String),
    Source(IngestError),
}

impl Failure {
    fn reason(&self) -> &'static str {
        match self {
            Failure::NoScope => "no_scope",
            Failure::UnknownScope(_) => "unknown_scope",
            Failure::Source(_) => "source",
        }
    }

    fn into_error(self, span: &Span) -> IngestError {
        match self {
            Failure::NoScope => {
                IngestError::metadata(format!("span {} has no scope tag", span.span_id))
            }
            Failure::UnknownScope(scope) => IngestError::metadata(format!("unknown scope {}", scope)),
            Failure::Source(e) => e,
        }
    }
}
