//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration for local development.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ineedit_market::MarketPolicy;
use ineedit_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_SWEEP_INTERVAL_SECS};
use ineedit_store::Database;

/// Connection details for the Meilisearch listing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeiliConfig {
    /// Env: `MEILI_URL`
    pub url: String,

    /// Env: `MEILI_API_KEY`
    pub api_key: Option<String>,

    /// Env: `MEILI_INDEX`
    /// Default: `listings`
    pub index: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: the platform data directory, else `./ineedit.db`.
    pub database_path: PathBuf,

    /// Search index. `None` (no `MEILI_URL`) disables projection.
    pub meili: Option<MeiliConfig>,

    /// Period of the offer expiry sweeper.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: 3600
    pub sweep_interval: Duration,

    /// Env: `PLATFORM_FEE_BPS`, `OFFER_FLOOR_PERCENT`, `OFFER_TTL_HOURS`,
    /// `BROADCAST_WAVE_PERCENT`, `MAX_BROADCAST_WAVES`
    pub policy: MarketPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./ineedit.db"),
            meili: None,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            policy: MarketPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        if std::env::var_os("DATABASE_PATH").is_none() {
            match Database::default_path() {
                Ok(path) => config.database_path = path,
                Err(e) => {
                    tracing::warn!(error = %e, "No platform data directory, using ./ineedit.db");
                }
            }
        }
        config
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values
    /// are logged and replaced by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let defaults = MarketPolicy::default();

        config.http_addr = parsed(&lookup, "HTTP_ADDR", config.http_addr, |_| true);

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("MEILI_URL").filter(|u| !u.is_empty()) {
            config.meili = Some(MeiliConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key: lookup("MEILI_API_KEY").filter(|k| !k.is_empty()),
                index: lookup("MEILI_INDEX")
                    .filter(|i| !i.is_empty())
                    .unwrap_or_else(|| "listings".to_string()),
            });
        }

        let secs = parsed(&lookup, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS, |s| *s > 0);
        config.sweep_interval = Duration::from_secs(secs);

        config.policy = MarketPolicy {
            platform_fee_bps: parsed(&lookup, "PLATFORM_FEE_BPS", defaults.platform_fee_bps, |v| {
                *v <= 10_000
            }),
            offer_floor_percent: parsed(
                &lookup,
                "OFFER_FLOOR_PERCENT",
                defaults.offer_floor_percent,
                |v| *v <= 100,
            ),
            offer_ttl_hours: parsed(&lookup, "OFFER_TTL_HOURS", defaults.offer_ttl_hours, |v| {
                *v >= 0
            }),
            broadcast_wave_percent: parsed(
                &lookup,
                "BROADCAST_WAVE_PERCENT",
                defaults.broadcast_wave_percent,
                |v| (1..=100).contains(v),
            ),
            max_broadcast_waves: parsed(
                &lookup,
                "MAX_BROADCAST_WAVES",
                defaults.max_broadcast_waves,
                |v| *v > 0,
            ),
        };

        config
    }
}

/// Parse `key` if present, keeping `default` when it is malformed or fails
/// `valid`.
fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            tracing::warn!(key, %value, %default, "Out-of-range setting, using default");
            default
        }
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, %default, "Invalid setting, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.policy, MarketPolicy::default());
        assert!(config.meili.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/market.db"),
            ("MEILI_URL", "http://search:7700/"),
            ("MEILI_API_KEY", "secret"),
            ("SWEEP_INTERVAL_SECS", "60"),
            ("PLATFORM_FEE_BPS", "500"),
            ("OFFER_TTL_HOURS", "0"),
        ]));
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.database_path, PathBuf::from("/tmp/market.db"));
        assert_eq!(
            config.meili,
            Some(MeiliConfig {
                url: "http://search:7700".into(),
                api_key: Some("secret".into()),
                index: "listings".into(),
            })
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.policy.platform_fee_bps, 500);
        assert_eq!(config.policy.offer_ttl_hours, 0);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("OFFER_FLOOR_PERCENT", "150"),
            ("MAX_BROADCAST_WAVES", "three"),
        ]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.policy.offer_floor_percent, 60);
        assert_eq!(config.policy.max_broadcast_waves, 3);
    }
}
