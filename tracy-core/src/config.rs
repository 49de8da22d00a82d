use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct TracyConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tracer: TracerConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Unix socket the subscriber feed listens on
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Capacity of the cache actor's mailbox. Senders wait once it is full.
    pub queue_capacity: usize,
    /// Upper bound on both enqueueing a cache message and awaiting its reply.
    pub request_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            request_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TracerConfig {
    /// Maximum stored length, in bytes, of a captured raw request.
    pub max_request_size: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            max_request_size: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 7777,
        }
    }
}

impl TracyConfig {
    /// Load from a TOML file, with `TRACY__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TRACY").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
