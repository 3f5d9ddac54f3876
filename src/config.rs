//! Process configuration and stored system settings

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `sys_config` key holding the reward percentage.
pub const REWARD_SETTING_KEY: &str = "point";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("system setting {0:?} is not configured")]
    MissingSetting(String),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub nats_url: Option<String>,
    pub order_sn_prefix: String,
    pub payment_subject: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> { Self::from_lookup(|key| std::env::var(key).ok()) }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;
        Ok(Self {
            database_url,
            port: parse_or(&lookup, "PORT", 8083)?,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: lookup("NATS_URL").filter(|url| !url.trim().is_empty()),
            order_sn_prefix: lookup("ORDER_SN_PREFIX").unwrap_or_else(|| "SN".to_string()),
            payment_subject: lookup("PAYMENT_SUBJECT").unwrap_or_else(|| "payments.jsapi.prepare".to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key: key.to_string(), value }),
    }
}

/// A row of `sys_config`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSetting { pub value: String, pub enabled: bool }

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/shop")])).unwrap();
        assert_eq!(cfg.port, 8083);
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.order_sn_prefix, "SN");
        assert!(cfg.nats_url.is_none());
    }

    #[test]
    fn test_missing_database_url() {
        assert_eq!(AppConfig::from_lookup(lookup(&[])).unwrap_err(), ConfigError::MissingEnv("DATABASE_URL"));
    }

    #[test]
    fn test_bad_port() {
        let err = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "x"), ("PORT", "eighty")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: "PORT".into(), value: "eighty".into() });
    }
}
