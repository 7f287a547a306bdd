use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// HTTP service configuration loaded from environment variables.
///
/// Upstream client settings (`OPENROUTER_*`, `WIKIPEDIA_*`, `SCORING_MODEL`) are read by
/// the clients themselves in `wiki-common`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address, e.g. "0.0.0.0:8000".
    pub bind_addr: String,
    /// Hard wall-clock limit for any request, streaming or not.
    pub request_timeout: Duration,
    /// Advertised keep-alive timeout; heartbeats are sent at half this period.
    pub keepalive_timeout: Duration,
    /// Connection capacity hint. Logged only.
    pub max_connections: usize,
    /// Where usage counters are persisted.
    pub stats_file: PathBuf,
    pub stats_flush_interval: Duration,
}

impl Config {
    /// Optional (all have defaults):
    /// - `BIND_ADDR` (default: "0.0.0.0:8000")
    /// - `SERVER_TIMEOUT` seconds (default: 300)
    /// - `KEEPALIVE_TIMEOUT` seconds (default: 60)
    /// - `MAX_CONNECTIONS` (default: 100)
    /// - `STATS_FILE` (default: "server_stats.json")
    /// - `STATS_FLUSH_SECS` (default: 5)
    pub fn from_env() -> Result<Self, AppError> {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let request_timeout = positive_secs("SERVER_TIMEOUT", 300)?;
        let keepalive_timeout = positive_secs("KEEPALIVE_TIMEOUT", 60)?;
        let max_connections = env_or("MAX_CONNECTIONS", 100usize)?;
        let stats_file = std::env::var("STATS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("server_stats.json"));
        let stats_flush_interval = positive_secs("STATS_FLUSH_SECS", 5)?;

        Ok(Self {
            bind_addr,
            request_timeout,
            keepalive_timeout,
            max_connections,
            stats_file,
            stats_flush_interval,
        })
    }

    /// Period of the `ping` events on a search stream.
    pub fn heartbeat_interval(&self) -> Duration {
        self.keepalive_timeout / 2
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn positive_secs(name: &str, default: u64) -> Result<Duration, AppError> {
    let secs = env_or(name, default)?;
    if secs == 0 {
        return Err(AppError::Config(format!("{name} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_half_the_keepalive() {
        let config = Config {
            bind_addr: "127.0.0.1:0".to_string(),
            request_timeout: Duration::from_secs(300),
            keepalive_timeout: Duration::from_secs(60),
            max_connections: 100,
            stats_file: PathBuf::from("server_stats.json"),
            stats_flush_interval: Duration::from_secs(5),
        };
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn unset_variable_falls_back_to_default() {
        let value: u64 = env_or("WIKI_SERVER_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
