//! Service configuration.
//!
//! # Example
//!
//! ```
//! use error_insights::ServiceConfig;
//!
//! // Defaults target a local docker-compose stack
//! let config = ServiceConfig::default();
//! assert_eq!(config.elasticsearch_index, "error-events");
//! assert_eq!(config.search_cache_ttl_secs, 300);
//!
//! // Override what differs
//! let config = ServiceConfig {
//!     mongo_uri: "mongodb://mongo:27017".into(),
//!     kafka_brokers: "kafka:9092".into(),
//!     ..Default::default()
//! };
//! ```
//!
//! In deployment every field is read from an `ERROR_INSIGHTS_`-prefixed
//! environment variable, e.g. `ERROR_INSIGHTS_REDIS_URL`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::storage::ElasticsearchConfig;

pub const ENV_PREFIX: &str = "ERROR_INSIGHTS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// MongoDB connection string
    #[serde(default = "default_mongo_uri")]
    pub mongo_uri: String,
    #[serde(default = "default_mongo_database")]
    pub mongo_database: String,
    #[serde(default = "default_mongo_collection")]
    pub mongo_collection: String,

    #[serde(default = "default_elasticsearch_url")]
    pub elasticsearch_url: String,
    #[serde(default = "default_elasticsearch_index")]
    pub elasticsearch_index: String,
    #[serde(default)]
    pub elasticsearch_username: Option<String>,
    #[serde(default)]
    pub elasticsearch_password: Option<String>,

    /// Redis connection string for the query cache
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Cache TTLs in seconds
    #[serde(default = "default_search_cache_ttl_secs")]
    pub search_cache_ttl_secs: u64,
    #[serde(default = "default_stats_cache_ttl_secs")]
    pub stats_cache_ttl_secs: u64,

    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,
    #[serde(default = "default_kafka_topic")]
    pub kafka_topic: String,
    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,
    #[serde(default = "default_kafka_client_id")]
    pub kafka_client_id: String,

    /// Consumer batch bounds
    #[serde(default = "default_batch_max_messages")]
    pub batch_max_messages: usize,
    #[serde(default = "default_poll_window_ms")]
    pub poll_window_ms: u64,

    /// Connect/request timeout for both stores
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// JSON array of events published once into an empty deployment
    #[serde(default)]
    pub seed_file: Option<String>,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_mongo_uri() -> String { "mongodb://localhost:27017".to_string() }
fn default_mongo_database() -> String { "error-insights".to_string() }
fn default_mongo_collection() -> String { "error_events".to_string() }
fn default_elasticsearch_url() -> String { "http://localhost:9200".to_string() }
fn default_elasticsearch_index() -> String { "error-events".to_string() }
fn default_redis_url() -> String { "redis://localhost:6379/0".to_string() }
fn default_search_cache_ttl_secs() -> u64 { 300 }
fn default_stats_cache_ttl_secs() -> u64 { 600 }
fn default_kafka_brokers() -> String { "localhost:9092".to_string() }
fn default_kafka_topic() -> String { "error-events".to_string() }
fn default_kafka_group_id() -> String { "error-events-processor".to_string() }
fn default_kafka_client_id() -> String { "error-tracking-service".to_string() }
fn default_batch_max_messages() -> usize { 100 }
fn default_poll_window_ms() -> u64 { 500 }
fn default_backend_timeout_ms() -> u64 { 10_000 }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mongo_uri: default_mongo_uri(),
            mongo_database: default_mongo_database(),
            mongo_collection: default_mongo_collection(),
            elasticsearch_url: default_elasticsearch_url(),
            elasticsearch_index: default_elasticsearch_index(),
            elasticsearch_username: None,
            elasticsearch_password: None,
            redis_url: default_redis_url(),
            search_cache_ttl_secs: default_search_cache_ttl_secs(),
            stats_cache_ttl_secs: default_stats_cache_ttl_secs(),
            kafka_brokers: default_kafka_brokers(),
            kafka_topic: default_kafka_topic(),
            kafka_group_id: default_kafka_group_id(),
            kafka_client_id: default_kafka_client_id(),
            batch_max_messages: default_batch_max_messages(),
            poll_window_ms: default_poll_window_ms(),
            backend_timeout_ms: default_backend_timeout_ms(),
            seed_file: None,
            log_json: false,
        }
    }
}

impl ServiceConfig {
    /// Load from `ERROR_INSIGHTS_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(Some(vars))
    }

    fn load(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        use ::config::{Config, Environment};

        let config: Self = Config::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_max_messages == 0 {
            return Err(ConfigError::Invalid("batch_max_messages must be at least 1".into()));
        }
        for (name, value) in [
            ("mongo_uri", &self.mongo_uri),
            ("elasticsearch_url", &self.elasticsearch_url),
            ("redis_url", &self.redis_url),
            ("kafka_brokers", &self.kafka_brokers),
            ("kafka_topic", &self.kafka_topic),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }

    #[must_use]
    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_cache_ttl_secs)
    }

    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    #[must_use]
    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }

    #[must_use]
    pub fn elasticsearch(&self) -> ElasticsearchConfig {
        ElasticsearchConfig {
            url: self.elasticsearch_url.clone(),
            index: self.elasticsearch_index.clone(),
            username: self.elasticsearch_username.clone(),
            password: self.elasticsearch_password.clone(),
            timeout: self.backend_timeout(),
            ..Default::default()
        }
    }

    #[cfg(feature = "kafka")]
    #[must_use]
    pub fn kafka(&self) -> crate::ingest::KafkaConfig {
        crate::ingest::KafkaConfig {
            brokers: self.kafka_brokers.clone(),
            topic: self.kafka_topic.clone(),
            group_id: self.kafka_group_id.clone(),
            client_id: self.kafka_client_id.clone(),
            max_batch: self.batch_max_messages,
            poll_window: self.poll_window(),
        }
    }
}
