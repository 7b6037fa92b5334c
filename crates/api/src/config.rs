//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::RouterConfig;
use projections::PublisherConfig;

/// Log output format for the `fmt` layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL event log; unset keeps events in memory
/// - `COMMAND_MAX_ATTEMPTS`: attempts per command on conflict (default: `3`)
/// - `COMMAND_TIMEOUT_MS`: how long a request waits for its command (default: `5000`)
/// - `PROJECTION_INITIAL_BACKOFF_MS` / `PROJECTION_MAX_BACKOFF_MS`: projection
///   retry delays (defaults: `50` / `5000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub command_max_attempts: u32,
    pub command_timeout: Duration,
    pub projection_initial_backoff: Duration,
    pub projection_max_backoff: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .map_or(default, Duration::from_millis)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            command_max_attempts: lookup("COMMAND_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.command_max_attempts),
            command_timeout: millis("COMMAND_TIMEOUT_MS", defaults.command_timeout),
            projection_initial_backoff: millis(
                "PROJECTION_INITIAL_BACKOFF_MS",
                defaults.projection_initial_backoff,
            ),
            projection_max_backoff: millis(
                "PROJECTION_MAX_BACKOFF_MS",
                defaults.projection_max_backoff,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_attempts: self.command_max_attempts,
            submit_timeout: self.command_timeout,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            initial_backoff: self.projection_initial_backoff,
            max_backoff: self.projection_max_backoff,
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            command_max_attempts: 3,
            command_timeout: Duration::from_millis(5000),
            projection_initial_backoff: Duration::from_millis(50),
            projection_max_backoff: Duration::from_millis(5000),
        }
    }
}
