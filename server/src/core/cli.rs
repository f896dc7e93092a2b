use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::BusBackendType;
use super::constants::{
    ENV_BUS_BACKEND, ENV_BUS_REDIS_URL, ENV_CASSANDRA_HOSTS, ENV_CLICKHOUSE_URL, ENV_CONFIG,
    ENV_ELASTICSEARCH_URL, ENV_HOST, ENV_INGEST_ENABLED, ENV_INGEST_PARALLELISM, ENV_LOG_JSON,
    ENV_METRICS_QUERY_URL, ENV_PORT,
};

#[derive(Parser)]
#[command(name = "tracehouse")]
#[command(version, about = "Distributed trace ingestion and query server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = ENV_LOG_JSON)]
    pub log_json: bool,

    /// Message bus backend (memory or redis)
    #[arg(long, global = true, env = ENV_BUS_BACKEND, value_parser = parse_bus_backend)]
    pub bus_backend: Option<BusBackendType>,

    /// Redis Streams URL for the message bus
    #[arg(long, global = true, env = ENV_BUS_REDIS_URL)]
    pub bus_redis_url: Option<String>,

    /// Enable or disable the ingest consumers
    #[arg(long, global = true, env = ENV_INGEST_ENABLED)]
    pub ingest_enabled: Option<bool>,

    /// Ingest workers per topic
    #[arg(long, global = true, env = ENV_INGEST_PARALLELISM)]
    pub ingest_parallelism: Option<usize>,

    /// Cassandra contact points, comma separated (enables the Cassandra backend)
    #[arg(long, global = true, env = ENV_CASSANDRA_HOSTS, value_delimiter = ',')]
    pub cassandra_hosts: Option<Vec<String>>,

    /// ClickHouse URL (enables the ClickHouse backend)
    #[arg(long, global = true, env = ENV_CLICKHOUSE_URL)]
    pub clickhouse_url: Option<String>,

    /// Elasticsearch URL (enables the Elasticsearch backend)
    #[arg(long, global = true, env = ENV_ELASTICSEARCH_URL)]
    pub elasticsearch_url: Option<String>,

    /// Metrics store query endpoint used by trace search
    #[arg(long, global = true, env = ENV_METRICS_QUERY_URL)]
    pub metrics_query_url: Option<String>,
}

/// Parse bus backend from CLI/env string
fn parse_bus_backend(s: &str) -> Result<BusBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(BusBackendType::Memory),
        "redis" => Ok(BusBackendType::Redis),
        _ => Err(format!(
            "Invalid bus backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// Load and validate configuration, then exit
    Check,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub log_json: bool,
    pub bus_backend: Option<BusBackendType>,
    pub bus_redis_url: Option<String>,
    pub ingest_enabled: Option<bool>,
    pub ingest_parallelism: Option<usize>,
    pub cassandra_hosts: Option<Vec<String>>,
    pub clickhouse_url: Option<String>,
    pub elasticsearch_url: Option<String>,
    pub metrics_query_url: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        log_json: cli.log_json,
        bus_backend: cli.bus_backend,
        bus_redis_url: cli.bus_redis_url,
        ingest_enabled: cli.ingest_enabled,
        ingest_parallelism: cli.ingest_parallelism,
        cassandra_hosts: cli.cassandra_hosts,
        clickhouse_url: cli.clickhouse_url,
        elasticsearch_url: cli.elasticsearch_url,
        metrics_query_url: cli.metrics_query_url,
    };
    (config, cli.command)
}
