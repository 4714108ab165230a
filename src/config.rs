//! Pipeline configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is loaded first when present.
//!
//! # Environment Variables
//!
//! All optional; blank values count as unset.
//!
//! - `HTTP_ADDR` - Lookup API bind address (default: 0.0.0.0:8081)
//! - `KAFKA_BROKERS` - Comma separated broker list (default: localhost:9093)
//! - `KAFKA_TOPIC` - Ingest topic (default: orders)
//! - `KAFKA_GROUP_ID` - Consumer group (default: orders-consumer)
//! - `POSTGRES_DSN` / `DATABASE_URL` - Store connection string
//! - `DB_MAX_CONNECTIONS` / `DB_MIN_CONNECTIONS` - Pool bounds (default: 10 / 2)
//! - `WORKERS` - Worker count (default: 4)
//! - `TASK_QUEUE_SIZE` / `QUEUE_SIZE` - Task queue capacity (default: 100)
//! - `ACK_QUEUE_SIZE` - Ack queue capacity (default: 100)
//! - `PERSIST_TIMEOUT_MS` - Per-task persistence timeout (default: 5000)
//! - `LOOKUP_TIMEOUT_MS` - Store read timeout for API lookups (default: 5000)
//! - `FETCH_RETRY_BACKOFF_MS` - Pause after a failed broker read (default: 1000)
//! - `CACHE_WARMUP_LIMIT` - Orders preloaded into the cache (default: 0)

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::broker::KafkaSettings;
use crate::lifecycle::PipelineSettings;

const DEFAULT_BROKERS: &str = "localhost:9093";
const DEFAULT_TOPIC: &str = "orders";
const DEFAULT_GROUP_ID: &str = "orders-consumer";
const DEFAULT_DSN: &str = "postgres://l0:L0@localhost:5432/l0_wb";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

fn invalid(key: &str, reason: impl Display) -> ConfigError {
    ConfigError::InvalidEnvVar(key.to_string(), reason.to_string())
}

/// Store connection settings.
#[derive(Debug)]
pub struct PostgresConfig {
    pub dsn: SecretString,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Everything the binary needs to start.
#[derive(Debug)]
pub struct PipelineConfig {
    pub http_addr: SocketAddr,
    pub kafka: KafkaSettings,
    pub postgres: PostgresConfig,
    pub pipeline: PipelineSettings,
}

impl PipelineConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but unparseable or out
    /// of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Source(lookup);
        let defaults = PipelineSettings::default();

        let http_addr: SocketAddr = env.parse_or("HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8081)))?;

        let brokers: Vec<String> = env
            .string_or("KAFKA_BROKERS", DEFAULT_BROKERS)
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(String::from)
            .collect();
        if brokers.is_empty() {
            return Err(invalid("KAFKA_BROKERS", "no broker addresses"));
        }

        let kafka = KafkaSettings {
            brokers,
            topic: env.string_or("KAFKA_TOPIC", DEFAULT_TOPIC),
            group_id: env.string_or("KAFKA_GROUP_ID", DEFAULT_GROUP_ID),
        };

        let postgres = PostgresConfig {
            dsn: SecretString::from(
                env.first_of(&["POSTGRES_DSN", "DATABASE_URL"])
                    .unwrap_or_else(|| DEFAULT_DSN.to_string()),
            ),
            max_connections: env.parse_or("DB_MAX_CONNECTIONS", 10)?,
            min_connections: env.parse_or("DB_MIN_CONNECTIONS", 2)?,
        };
        if postgres.max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "must be at least 1"));
        }
        if postgres.min_connections > postgres.max_connections {
            return Err(invalid("DB_MIN_CONNECTIONS", "exceeds DB_MAX_CONNECTIONS"));
        }

        let task_queue_key = env
            .first_key(&["TASK_QUEUE_SIZE", "QUEUE_SIZE"])
            .unwrap_or("TASK_QUEUE_SIZE");

        let pipeline = PipelineSettings {
            workers: env.positive("WORKERS", defaults.workers)?,
            task_queue_size: env.positive(task_queue_key, defaults.task_queue_size)?,
            ack_queue_size: env.positive("ACK_QUEUE_SIZE", defaults.ack_queue_size)?,
            persist_timeout: env.millis_or("PERSIST_TIMEOUT_MS", defaults.persist_timeout)?,
            lookup_timeout: env.millis_or("LOOKUP_TIMEOUT_MS", defaults.lookup_timeout)?,
            fetch_retry_backoff: env
                .millis_or("FETCH_RETRY_BACKOFF_MS", defaults.fetch_retry_backoff)?,
            cache_warmup_limit: env.parse_or("CACHE_WARMUP_LIMIT", defaults.cache_warmup_limit)?,
        };
        if pipeline.persist_timeout.is_zero() {
            return Err(invalid("PERSIST_TIMEOUT_MS", "must be at least 1"));
        }
        if pipeline.lookup_timeout.is_zero() {
            return Err(invalid("LOOKUP_TIMEOUT_MS", "must be at least 1"));
        }

        Ok(Self {
            http_addr,
            kafka,
            postgres,
            pipeline,
        })
    }
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(invalid(key, "must be at least 1"));
    }
    Ok(value)
}

struct Source<F>(F);

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, with blanks treated as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// First key in `keys` that has a value.
    fn first_key<'k>(&self, keys: &[&'k str]) -> Option<&'k str> {
        keys.iter().copied().find(|key| self.get(key).is_some())
    }

    fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(value) => value.parse().map_err(|e| invalid(key, e)),
            None => Ok(default),
        }
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        positive(key, self.parse_or(key, default)?)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .parse()
                .map(Duration::from_millis)
                .map_err(|e| invalid(key, e)),
            None => Ok(default),
        }
    }
}
