use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::env::resolve_env_vars;

/// Root configuration for the Tally runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TallyConfig {
    /// HTTP query surface bind address.
    pub bind_address: String,
    /// HTTP query surface port.
    pub port: u16,
    /// SQLite database path for the durable store.
    pub db_path: String,
    /// Redis URL for the shared cache tier. When absent, an in-process
    /// tier is used (single-node development).
    pub redis_url: Option<String>,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Cache tier key namespace: `<prefix>_<guildId>`.
    pub key_prefix: String,
    /// Seconds between batch-queue flushes into the cache tier.
    pub flush_interval_secs: u64,
    /// Seconds between cache tier reconciliations into the durable store.
    pub invalidate_interval_secs: u64,
    /// Guilds per bulk-persist batch during invalidation.
    pub persist_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            db_path: "tally.db".to_string(),
            redis_url: None,
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "chat".to_string(),
            flush_interval_secs: 15,
            invalidate_interval_secs: 30,
            persist_batch_size: 50,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
        }
    }
}

impl TallyConfig {
    /// Load configuration: compiled defaults, then the optional TOML file
    /// (with `${VAR}` substitution), then `TALLY_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let substituted = resolve_env_vars(&raw)?;
                let config: TallyConfig = toml::from_str(&substituted)
                    .with_context(|| format!("Invalid config file {}", path.display()))?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("TALLY_BIND") {
            self.bind_address = bind;
        }
        if let Some(port) = env_parsed("TALLY_PORT") {
            self.port = port;
        }
        if let Ok(db) = std::env::var("TALLY_DB") {
            self.db_path = db;
        }
        if let Ok(url) = std::env::var("TALLY_REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Ok(prefix) = std::env::var("TALLY_KEY_PREFIX") {
            self.cache.key_prefix = prefix;
        }
        if let Some(secs) = env_parsed("TALLY_FLUSH_INTERVAL_SECS") {
            self.cache.flush_interval_secs = secs;
        }
        if let Some(secs) = env_parsed("TALLY_INVALIDATE_INTERVAL_SECS") {
            self.cache.invalidate_interval_secs = secs;
        }
        if let Some(size) = env_parsed("TALLY_PERSIST_BATCH_SIZE") {
            self.cache.persist_batch_size = size;
        }
        if let Some(secs) = env_parsed("TALLY_RATE_WINDOW_SECS") {
            self.rate_limit.window_secs = secs;
        }
        if let Some(max) = env_parsed("TALLY_RATE_MAX_REQUESTS") {
            self.rate_limit.max_requests = max;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("TALLY_LOG_DIR") {
            self.logging.dir = dir;
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
