use clap::Parser;
use humantime_serde::re::humantime;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::throttle::ThrottleRate;

pub const DEFAULT_PAGE_SIZE: u64 = 100;
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 300;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid throttle rate '{0}': expected '<requests>/<second|minute|hour|day>'")]
    InvalidRate(String),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Service configuration. Every option can also be set from the environment.
#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "periodic-api", version, about)]
#[validate(schema(function = "validate_page_sizes"))]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8000")]
    pub bind_addr: SocketAddr,

    /// SQLite database file holding the element records
    #[arg(long, env = "DATABASE_PATH", default_value = "elements.db")]
    pub database_path: PathBuf,

    /// JSON file of elements to import at startup
    #[arg(long, env = "SEED_FILE")]
    pub seed_file: Option<PathBuf>,

    /// Default number of elements per list page
    #[arg(long, env = "PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    #[validate(range(min = 1))]
    pub page_size: u64,

    /// Largest page size a client may request
    #[arg(long, env = "MAX_PAGE_SIZE", default_value_t = DEFAULT_MAX_PAGE_SIZE)]
    #[validate(range(min = 1))]
    pub max_page_size: u64,

    /// Lifetime of cached responses (e.g. "1h", "90s")
    #[arg(long, env = "CACHE_TTL", default_value = "1h", value_parser = humantime::parse_duration)]
    #[validate(custom(function = "validate_nonzero_duration"))]
    pub cache_ttl: Duration,

    /// Most responses the cache holds before evicting the oldest
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = DEFAULT_CACHE_MAX_ENTRIES)]
    #[validate(range(min = 1))]
    pub cache_max_entries: usize,

    /// Quota for anonymous clients
    #[arg(long, env = "ANON_RATE", default_value = "100/hour")]
    pub anon_rate: ThrottleRate,

    /// Quota for every client, keyed by credential when authenticated
    #[arg(long, env = "USER_RATE", default_value = "1000/hour")]
    pub user_rate: ThrottleRate,

    /// API keys recognised as authenticated credentials
    #[arg(long, env = "API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// Take the client address from X-Forwarded-For / X-Real-IP
    #[arg(long, env = "TRUST_FORWARDED_HEADERS")]
    pub trust_forwarded_headers: bool,

    /// How often expired cache entries and idle throttle windows are dropped
    #[arg(long, env = "CLEANUP_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    #[validate(custom(function = "validate_nonzero_duration"))]
    pub cleanup_interval: Duration,

    /// Log level for this crate
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            database_path: PathBuf::from("elements.db"),
            seed_file: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            anon_rate: ThrottleRate::per_hour(100),
            user_rate: ThrottleRate::per_hour(1000),
            api_keys: Vec::new(),
            trust_forwarded_headers: false,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from command-line arguments and the environment.
    /// Exits the process on `--help` or unparseable arguments.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }
}

fn validate_page_sizes(config: &Config) -> Result<(), ValidationError> {
    if config.page_size > config.max_page_size {
        return Err(ValidationError::new("page_size")
            .with_message("page_size cannot exceed max_page_size".into()));
    }
    if config.anon_rate.requests == 0 || config.user_rate.requests == 0 {
        return Err(ValidationError::new("rate")
            .with_message("throttle rates must allow at least one request".into()));
    }
    Ok(())
}

fn validate_nonzero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("duration")
            .with_message("duration must be greater than zero".into()));
    }
    Ok(())
}
