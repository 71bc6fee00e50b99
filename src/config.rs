//! Runtime configuration.
//!
//! Environment-driven settings for the graph connection, the worker
//! pools and the generator. Every knob has a default that matches the
//! production deployment; env vars override.

use std::env;
use std::time::Duration;

/// Complete settings for one backend process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub graph: GraphSettings,
    pub pipeline: PipelineSettings,
    pub generator: GeneratorSettings,
}

/// Graph connection settings.
#[derive(Debug, Clone)]
pub struct GraphSettings {
    /// `GRAPH_HOST_ADDRESS`, default `localhost`.
    pub host: String,
    /// `GRAPH_PORT`, default 8182.
    pub port: u16,
    /// Pooled websocket connections shared by all callers.
    pub pool_size: usize,
    /// Per-call read timeout.
    pub read_timeout: Duration,
    /// Dial timeout for a fresh connection.
    pub connect_timeout: Duration,
}

impl GraphSettings {
    pub fn url(&self) -> String {
        format!("ws://{}:{}/gremlin", self.host, self.port)
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8182,
            pool_size: 4,
            read_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Worker pool and queue sizing.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Transaction workers executing the write-then-submit pipeline.
    pub txn_workers: usize,
    /// Bounded transaction task queue; overflow is dropped, not blocked on.
    pub txn_queue_capacity: usize,
    /// Fraud evaluation workers, distinct from the transaction pool.
    pub fraud_workers: usize,
    /// Bounded fraud task queue.
    pub fraud_queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            txn_workers: 128,
            txn_queue_capacity: 1024,
            fraud_workers: 64,
            fraud_queue_capacity: 512,
        }
    }
}

/// Generator behavior.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// On-disk location of the persisted max-rate record.
    pub max_rate_store_path: String,
    /// Kick off a bulk load (and poll it to completion) at startup.
    pub auto_load_data: bool,
    /// Bulk-load source directories, used only when `auto_load_data` is set.
    pub bulk_vertices_dir: String,
    pub bulk_edges_dir: String,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_rate_store_path: "max_rate_store.json".to_string(),
            auto_load_data: false,
            bulk_vertices_dir: "/data/graph_csv/vertices".to_string(),
            bulk_edges_dir: "/data/graph_csv/edges".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            graph: GraphSettings::default(),
            pipeline: PipelineSettings::default(),
            generator: GeneratorSettings::default(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment, falling back to
    /// defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            graph: GraphSettings {
                host: env::var("GRAPH_HOST_ADDRESS").unwrap_or(defaults.graph.host),
                port: env_parse("GRAPH_PORT", defaults.graph.port),
                pool_size: env_parse("GRAPH_POOL_SIZE", defaults.graph.pool_size),
                read_timeout: Duration::from_secs(env_parse(
                    "GRAPH_READ_TIMEOUT_SECS",
                    defaults.graph.read_timeout.as_secs(),
                )),
                connect_timeout: Duration::from_secs(env_parse(
                    "GRAPH_CONNECT_TIMEOUT_SECS",
                    defaults.graph.connect_timeout.as_secs(),
                )),
            },
            pipeline: PipelineSettings {
                txn_workers: env_parse("TXN_WORKERS", defaults.pipeline.txn_workers),
                txn_queue_capacity: env_parse(
                    "TXN_QUEUE_CAPACITY",
                    defaults.pipeline.txn_queue_capacity,
                ),
                fraud_workers: env_parse("FRAUD_WORKERS", defaults.pipeline.fraud_workers),
                fraud_queue_capacity: env_parse(
                    "FRAUD_QUEUE_CAPACITY",
                    defaults.pipeline.fraud_queue_capacity,
                ),
            },
            generator: GeneratorSettings {
                max_rate_store_path: env::var("MAX_RATE_STORE_PATH")
                    .unwrap_or(defaults.generator.max_rate_store_path),
                auto_load_data: env_flag("AUTO_LOAD_DATA", defaults.generator.auto_load_data),
                bulk_vertices_dir: env::var("BULK_VERTICES_DIR")
                    .unwrap_or(defaults.generator.bulk_vertices_dir),
                bulk_edges_dir: env::var("BULK_EDGES_DIR")
                    .unwrap_or(defaults.generator.bulk_edges_dir),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}
