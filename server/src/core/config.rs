use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::ingest::{ScopeMetadata, SpanFormat};
use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_CASSANDRA_GC_GRACE_SECS, DEFAULT_CASSANDRA_KEYSPACE,
    DEFAULT_CASSANDRA_REPLICATION_FACTOR, DEFAULT_CASSANDRA_TTL_SECS,
    DEFAULT_CLICKHOUSE_DATABASE, DEFAULT_CLICKHOUSE_MAX_IN_FLIGHT, DEFAULT_CLICKHOUSE_MAX_RETRIES,
    DEFAULT_CLICKHOUSE_RETRY_BASE_MS, DEFAULT_CLICKHOUSE_RETRY_MAX_MS, DEFAULT_CLICKHOUSE_TTL_DAYS,
    DEFAULT_CONSUMER_GROUP, DEFAULT_DEBUG_HTTP_TIMEOUT_SECS, DEFAULT_ELASTICSEARCH_INDEX_PREFIX,
    DEFAULT_ELASTICSEARCH_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_INGEST_BATCH_SIZE,
    DEFAULT_INGEST_BUFFER_SIZE, DEFAULT_INGEST_PARALLELISM, DEFAULT_INGEST_READ_TIMEOUT_MS,
    DEFAULT_METADATA_TTL_SECS, DEFAULT_METRICS_QUERY_TIMEOUT_SECS, DEFAULT_PORT,
    DEFAULT_SPAN_TOPIC,
};

// =============================================================================
// Backend Enums
// =============================================================================

/// Message bus backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for BusBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusBackendType::Memory => write!(f, "memory"),
            BusBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config Sections
// =============================================================================

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BusFileConfig {
    pub backend: Option<BusBackendType>,
    /// Redis Streams URL (or use TRACEHOUSE_BUS_REDIS_URL env var)
    pub redis_url: Option<String>,
}

/// One consumed topic and the wire format of its records
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicFileConfig {
    pub name: String,
    #[serde(default)]
    pub format: SpanFormat,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct IngestFileConfig {
    pub enabled: Option<bool>,
    pub topics: Option<Vec<TopicFileConfig>>,
    pub group: Option<String>,
    /// Workers per topic
    pub parallelism: Option<usize>,
    pub batch_size: Option<usize>,
    pub buffer_size: Option<usize>,
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CassandraFileConfig {
    pub enabled: Option<bool>,
    pub hosts: Option<Vec<String>>,
    pub keyspace: Option<String>,
    pub replication_factor: Option<u32>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ttl_secs: Option<u32>,
    pub gc_grace_secs: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ClickhouseFileConfig {
    pub enabled: Option<bool>,
    /// ClickHouse connection URL (or use TRACEHOUSE_CLICKHOUSE_URL env var)
    pub url: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Enable LZ4 compression (default: true)
    pub compression: Option<bool>,
    pub ttl_days: Option<u32>,
    /// Batch pool size (default: available parallelism)
    pub workers: Option<usize>,
    pub max_in_flight: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ElasticsearchFileConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub index_prefix: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MetricsQueryFileConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MetadataFileConfig {
    pub ttl_secs: Option<u64>,
    /// Scope key (terminus key) -> metadata
    pub scopes: Option<HashMap<String, ScopeMetadata>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DebugFileConfig {
    pub http_timeout_secs: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub bus: Option<BusFileConfig>,
    pub ingest: Option<IngestFileConfig>,
    pub cassandra: Option<CassandraFileConfig>,
    pub clickhouse: Option<ClickhouseFileConfig>,
    pub elasticsearch: Option<ElasticsearchFileConfig>,
    pub metrics_query: Option<MetricsQueryFileConfig>,
    pub metadata: Option<MetadataFileConfig>,
    pub debug: Option<DebugFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    tracing::debug!(path = %path.display(), "Loading config file");
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Layer `overlay` onto `base`: objects merge per key, anything else replaces
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// =============================================================================
// Runtime Config
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub backend: BusBackendType,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub format: SpanFormat,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub enabled: bool,
    pub topics: Vec<TopicConfig>,
    pub group: String,
    pub parallelism: usize,
    pub batch_size: usize,
    pub buffer_size: usize,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CassandraConfig {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ttl_secs: u32,
    pub gc_grace_secs: u32,
}

#[derive(Debug, Clone)]
pub struct ClickhouseConfig {
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub compression: bool,
    pub ttl_days: u32,
    pub workers: usize,
    pub max_in_flight: usize,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub index_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsQueryConfig {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MetadataConfig {
    pub ttl_secs: u64,
    pub scopes: HashMap<String, ScopeMetadata>,
}

#[derive(Debug, Clone)]
pub struct DebugConfig {
    pub http_timeout_secs: u64,
}

/// Final merged application configuration
///
/// A span backend is enabled when its section is present; with none
/// enabled the process keeps spans in memory.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub ingest: IngestConfig,
    pub cassandra: Option<CassandraConfig>,
    pub clickhouse: Option<ClickhouseConfig>,
    pub elasticsearch: Option<ElasticsearchConfig>,
    pub metrics_query: Option<MetricsQueryConfig>,
    pub metadata: MetadataConfig,
    pub debug: DebugConfig,
    pub log_json: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.tracehouse/tracehouse.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let mut merged = serde_json::Value::Object(Default::default());
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            merge_json(&mut merged, read_json(&profile_path)?);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            merge_json(&mut merged, read_json(&path)?);
            found_configs.push(path.display().to_string());
        }

        let file_config: FileConfig = serde_json::from_value(merged)
            .with_context(|| format!("Invalid configuration in {}", found_configs.join(", ")))?;
        file_config.warn_unknown_fields();
        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::from_sources(cli, file_config);
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, file config and CLI/env overrides
    pub(crate) fn from_sources(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_server = file_config.server.unwrap_or_default();
        let file_bus = file_config.bus.unwrap_or_default();
        let file_ingest = file_config.ingest.unwrap_or_default();
        let file_metadata = file_config.metadata.unwrap_or_default();
        let file_debug = file_config.debug.unwrap_or_default();

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT),
        };

        let bus = BusConfig {
            backend: cli.bus_backend.or(file_bus.backend).unwrap_or_default(),
            redis_url: cli.bus_redis_url.clone().or(file_bus.redis_url),
        };

        let topics = file_ingest
            .topics
            .unwrap_or_else(|| {
                vec![TopicFileConfig {
                    name: DEFAULT_SPAN_TOPIC.to_string(),
                    format: SpanFormat::default(),
                }]
            })
            .into_iter()
            .map(|t| TopicConfig {
                name: t.name,
                format: t.format,
            })
            .collect();

        let ingest = IngestConfig {
            enabled: cli.ingest_enabled.or(file_ingest.enabled).unwrap_or(true),
            topics,
            group: file_ingest
                .group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            parallelism: cli
                .ingest_parallelism
                .or(file_ingest.parallelism)
                .unwrap_or(DEFAULT_INGEST_PARALLELISM),
            batch_size: file_ingest.batch_size.unwrap_or(DEFAULT_INGEST_BATCH_SIZE),
            buffer_size: file_ingest.buffer_size.unwrap_or(DEFAULT_INGEST_BUFFER_SIZE),
            read_timeout_ms: file_ingest
                .read_timeout_ms
                .unwrap_or(DEFAULT_INGEST_READ_TIMEOUT_MS),
        };

        // cassandra: enabled by CLI hosts, or by a file section not explicitly disabled
        let cassandra = {
            let file = file_config.cassandra;
            let hosts = cli
                .cassandra_hosts
                .clone()
                .or_else(|| file.as_ref().and_then(|f| f.hosts.clone()));
            let enabled = cli.cassandra_hosts.is_some()
                || file
                    .as_ref()
                    .is_some_and(|f| f.enabled.unwrap_or(true));
            enabled.then(|| {
                let file = file.unwrap_or_default();
                CassandraConfig {
                    hosts: hosts.unwrap_or_default(),
                    keyspace: file
                        .keyspace
                        .unwrap_or_else(|| DEFAULT_CASSANDRA_KEYSPACE.to_string()),
                    replication_factor: file
                        .replication_factor
                        .unwrap_or(DEFAULT_CASSANDRA_REPLICATION_FACTOR),
                    username: file.username,
                    password: file.password,
                    ttl_secs: file.ttl_secs.unwrap_or(DEFAULT_CASSANDRA_TTL_SECS),
                    gc_grace_secs: file.gc_grace_secs.unwrap_or(DEFAULT_CASSANDRA_GC_GRACE_SECS),
                }
            })
        };

        let clickhouse = {
            let file = file_config.clickhouse;
            let url = cli
                .clickhouse_url
                .clone()
                .or_else(|| file.as_ref().and_then(|f| f.url.clone()));
            let enabled = cli.clickhouse_url.is_some()
                || file
                    .as_ref()
                    .is_some_and(|f| f.enabled.unwrap_or(true));
            enabled.then(|| {
                let file = file.unwrap_or_default();
                ClickhouseConfig {
                    url: url.unwrap_or_default(),
                    database: file
                        .database
                        .unwrap_or_else(|| DEFAULT_CLICKHOUSE_DATABASE.to_string()),
                    user: file.user,
                    password: file.password,
                    compression: file.compression.unwrap_or(true),
                    ttl_days: file.ttl_days.unwrap_or(DEFAULT_CLICKHOUSE_TTL_DAYS),
                    workers: file.workers.unwrap_or_else(|| {
                        std::thread::available_parallelism()
                            .map(|n| n.get())
                            .unwrap_or(1)
                    }),
                    max_in_flight: file
                        .max_in_flight
                        .unwrap_or(DEFAULT_CLICKHOUSE_MAX_IN_FLIGHT),
                    max_retries: file.max_retries.unwrap_or(DEFAULT_CLICKHOUSE_MAX_RETRIES),
                    retry_base_ms: file
                        .retry_base_ms
                        .unwrap_or(DEFAULT_CLICKHOUSE_RETRY_BASE_MS),
                    retry_max_ms: file.retry_max_ms.unwrap_or(DEFAULT_CLICKHOUSE_RETRY_MAX_MS),
                }
            })
        };

        let elasticsearch = {
            let file = file_config.elasticsearch;
            let url = cli
                .elasticsearch_url
                .clone()
                .or_else(|| file.as_ref().and_then(|f| f.url.clone()));
            let enabled = cli.elasticsearch_url.is_some()
                || file
                    .as_ref()
                    .is_some_and(|f| f.enabled.unwrap_or(true));
            enabled.then(|| {
                let file = file.unwrap_or_default();
                ElasticsearchConfig {
                    url: url.unwrap_or_default(),
                    index_prefix: file
                        .index_prefix
                        .unwrap_or_else(|| DEFAULT_ELASTICSEARCH_INDEX_PREFIX.to_string()),
                    username: file.username,
                    password: file.password,
                    timeout_secs: file
                        .timeout_secs
                        .unwrap_or(DEFAULT_ELASTICSEARCH_TIMEOUT_SECS),
                }
            })
        };

        let metrics_query = {
            let file = file_config.metrics_query.unwrap_or_default();
            cli.metrics_query_url
                .clone()
                .or(file.url)
                .map(|url| MetricsQueryConfig {
                    url,
                    timeout_secs: file
                        .timeout_secs
                        .unwrap_or(DEFAULT_METRICS_QUERY_TIMEOUT_SECS),
                })
        };

        Self {
            server,
            bus,
            ingest,
            cassandra,
            clickhouse,
            elasticsearch,
            metrics_query,
            metadata: MetadataConfig {
                ttl_secs: file_metadata.ttl_secs.unwrap_or(DEFAULT_METADATA_TTL_SECS),
                scopes: file_metadata.scopes.unwrap_or_default(),
            },
            debug: DebugConfig {
                http_timeout_secs: file_debug
                    .http_timeout_secs
                    .unwrap_or(DEFAULT_DEBUG_HTTP_TIMEOUT_SECS),
            },
            log_json: cli.log_json,
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.bus.backend == BusBackendType::Redis
            && self.bus.redis_url.as_ref().is_none_or(|u| u.is_empty())
        {
            anyhow::bail!(
                "Configuration error: bus.redis_url is required when bus.backend is 'redis'"
            );
        }

        let ingest = &self.ingest;
        if ingest.enabled {
            if ingest.topics.is_empty() {
                anyhow::bail!("Configuration error: ingest.topics must not be empty");
            }
            if let Some(t) = ingest.topics.iter().find(|t| t.name.trim().is_empty()) {
                anyhow::bail!(
                    "Configuration error: ingest topic name must not be empty (format {})",
                    t.format
                );
            }
            if ingest.parallelism == 0 || ingest.batch_size == 0 || ingest.buffer_size == 0 {
                anyhow::bail!(
                    "Configuration error: ingest.parallelism, batch_size and buffer_size must be greater than 0"
                );
            }
        }

        if let Some(ref c) = self.cassandra {
            if c.hosts.is_empty() {
                anyhow::bail!(
                    "Configuration error: cassandra.hosts is required when cassandra is enabled"
                );
            }
            if c.replication_factor == 0 {
                anyhow::bail!("Configuration error: cassandra.replication_factor must be greater than 0");
            }
        }

        if let Some(ref ch) = self.clickhouse {
            if ch.url.is_empty() {
                anyhow::bail!(
                    "Configuration error: clickhouse.url is required when clickhouse is enabled. \
                     Set via TRACEHOUSE_CLICKHOUSE_URL env var or clickhouse.url in config file."
                );
            }
            if ch.workers == 0 || ch.max_in_flight == 0 {
                anyhow::bail!(
                    "Configuration error: clickhouse.workers and clickhouse.max_in_flight must be greater than 0"
                );
            }
        }

        if let Some(ref es) = self.elasticsearch {
            if !es.url.starts_with("http://") && !es.url.starts_with("https://") {
                anyhow::bail!(
                    "Configuration error: elasticsearch.url must start with http:// or https://. Got: {}",
                    es.url
                );
            }
            if es.index_prefix.is_empty() {
                anyhow::bail!("Configuration error: elasticsearch.index_prefix must not be empty");
            }
        }

        if !self.has_span_backend() {
            tracing::warn!("No span backend configured, spans are kept in memory only");
        }
        if self.metrics_query.is_none() {
            tracing::warn!("metrics_query.url not set, trace search is unavailable");
        }

        Ok(())
    }

    pub fn has_span_backend(&self) -> bool {
        self.cassandra.is_some() || self.clickhouse.is_some() || self.elasticsearch.is_some()
    }
}

/// Get the profile config path (~/.tracehouse/tracehouse.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
