use std::str::FromStr;

use crate::utils::RetryConfig;

// ============================================================================
// Application Configuration
// ============================================================================
//
// Loaded from `ORDERS_*` environment variables, optionally seeded from a
// `.env` file. Every setting has a default; only malformed values fail.
//
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{key} must be at least 1")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Postgres URL. `None` runs against the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSettings {
    /// Age after which automatic status log entries may be pruned.
    pub automatic_retention_days: u32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            automatic_retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinanceSettings {
    /// Hand recompute to the background worker instead of running inline.
    pub defer_recompute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub max_passes: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { max_passes: 8 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub http: HttpSettings,
    pub audit: AuditSettings,
    pub finance: FinanceSettings,
    pub worker: WorkerSettings,
    pub sync: SyncSettings,
}

impl AppConfig {
    /// Load from the process environment after reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            tracing::debug!("Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database = DatabaseSettings {
            url: lookup("ORDERS_DATABASE_URL")
                .or_else(|| lookup("DATABASE_URL"))
                .filter(|url| !url.trim().is_empty()),
            max_connections: parse(&lookup, "ORDERS_DATABASE_MAX_CONNECTIONS", defaults.database.max_connections)?,
        };

        let config = Self {
            database,
            http: HttpSettings {
                port: parse(&lookup, "ORDERS_HTTP_PORT", defaults.http.port)?,
            },
            audit: AuditSettings {
                automatic_retention_days: parse(
                    &lookup,
                    "ORDERS_AUDIT_RETENTION_DAYS",
                    defaults.audit.automatic_retention_days,
                )?,
            },
            finance: FinanceSettings {
                defer_recompute: parse_flag(&lookup, "ORDERS_DEFER_RECOMPUTE", defaults.finance.defer_recompute)?,
            },
            worker: WorkerSettings {
                max_attempts: parse(&lookup, "ORDERS_WORKER_MAX_ATTEMPTS", defaults.worker.max_attempts)?,
                initial_delay_ms: parse(&lookup, "ORDERS_WORKER_INITIAL_DELAY_MS", defaults.worker.initial_delay_ms)?,
                max_delay_ms: parse(&lookup, "ORDERS_WORKER_MAX_DELAY_MS", defaults.worker.max_delay_ms)?,
            },
            sync: SyncSettings {
                max_passes: parse(&lookup, "ORDERS_SYNC_MAX_PASSES", defaults.sync.max_passes)?,
            },
        };

        if config.worker.max_attempts == 0 {
            return Err(ConfigError::Zero { key: "ORDERS_WORKER_MAX_ATTEMPTS" });
        }
        if config.sync.max_passes == 0 {
            return Err(ConfigError::Zero { key: "ORDERS_SYNC_MAX_PASSES" });
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::Zero { key: "ORDERS_DATABASE_MAX_CONNECTIONS" });
        }
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from_millis(
            self.worker.max_attempts,
            self.worker.initial_delay_ms,
            self.worker.max_delay_ms,
        )
    }

    pub fn audit_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.audit.automatic_retention_days))
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key,
                value: raw.to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.audit.automatic_retention_days, 90);
        assert_eq!(config.sync.max_passes, 8);
        assert!(!config.finance.defer_recompute);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = load(&[
            ("ORDERS_DATABASE_URL", "postgres://orders@localhost/orders"),
            ("ORDERS_HTTP_PORT", "8081"),
            ("ORDERS_DEFER_RECOMPUTE", "yes"),
            ("ORDERS_WORKER_MAX_ATTEMPTS", "5"),
            ("ORDERS_SYNC_MAX_PASSES", " 4 "),
        ])
        .unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://orders@localhost/orders"));
        assert_eq!(config.http.port, 8081);
        assert!(config.finance.defer_recompute);
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.sync.max_passes, 4);
    }

    #[test]
    fn test_plain_database_url_is_fallback() {
        let config = load(&[("DATABASE_URL", "postgres://fallback")]).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://fallback"));

        let config = load(&[("DATABASE_URL", "postgres://fallback"), ("ORDERS_DATABASE_URL", "postgres://own")]).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://own"));
    }

    #[test]
    fn test_malformed_value_is_rejected() {
        assert_eq!(
            load(&[("ORDERS_HTTP_PORT", "ninety")]),
            Err(ConfigError::InvalidValue {
                key: "ORDERS_HTTP_PORT",
                value: "ninety".to_string()
            })
        );
        assert!(load(&[("ORDERS_DEFER_RECOMPUTE", "maybe")]).is_err());
        assert_eq!(
            load(&[("ORDERS_SYNC_MAX_PASSES", "0")]),
            Err(ConfigError::Zero { key: "ORDERS_SYNC_MAX_PASSES" })
        );
    }

    #[test]
    fn test_retry_config_from_worker_settings() {
        let config = load(&[
            ("ORDERS_WORKER_MAX_ATTEMPTS", "4"),
            ("ORDERS_WORKER_INITIAL_DELAY_MS", "50"),
            ("ORDERS_WORKER_MAX_DELAY_MS", "400"),
        ])
        .unwrap();
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_delay, Duration::from_millis(50));
        assert_eq!(retry.max_delay, Duration::from_millis(400));
        assert_eq!(config.audit_retention(), chrono::Duration::days(90));
    }
}
