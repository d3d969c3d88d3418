//! Process configuration, read from the environment (12-factor).
//!
//! A `.env` file in the working directory is loaded first when present.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;

pub use loomerp_observability::LogFormat;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_REALTIME_CAPACITY: usize = 256;
const DEV_JWT_SECRET: &str = "loomerp-dev-secret-change-me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is required")]
    Missing { name: &'static str },
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub store: StoreBackend,
    pub realtime_channel_capacity: usize,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is the normal production case.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_raw = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            name: "BIND_ADDR",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let persistent = match var("USE_PERSISTENT_STORES") {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                name: "USE_PERSISTENT_STORES",
                value: raw.clone(),
                reason: "expected true/false".to_string(),
            })?,
        };
        let store = if persistent {
            let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing { name: "DATABASE_URL" })?;
            StoreBackend::Postgres { database_url }
        } else {
            StoreBackend::InMemory
        };

        let realtime_channel_capacity = match var("REALTIME_CHANNEL_CAPACITY") {
            None => DEFAULT_REALTIME_CAPACITY,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "REALTIME_CHANNEL_CAPACITY",
                        value: raw,
                        reason: "expected a positive integer".to_string(),
                    })
                }
            },
        };

        let log_format = match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected json or pretty".to_string(),
                })
            }
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            store,
            realtime_channel_capacity,
            log_format,
        })
    }

    /// True when no `JWT_SECRET` was configured. Callers warn once logging is up.
    pub fn uses_development_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_in_memory_json_logging() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.store, StoreBackend::InMemory);
        assert_eq!(config.realtime_channel_capacity, 256);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.uses_development_secret());
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = load(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "DATABASE_URL" }));

        let config = load(&[
            ("USE_PERSISTENT_STORES", "1"),
            ("DATABASE_URL", "postgres://loom@localhost/loomerp"),
            ("LOG_FORMAT", "Pretty"),
        ])
        .unwrap();
        assert!(matches!(config.store, StoreBackend::Postgres { .. }));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(load(&[("BIND_ADDR", "localhost")]).is_err());
        assert!(load(&[("REALTIME_CHANNEL_CAPACITY", "0")]).is_err());
        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
        assert!(load(&[("USE_PERSISTENT_STORES", "maybe")]).is_err());
    }
}
