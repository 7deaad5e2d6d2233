use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::engine::availability::{DEFAULT_HORIZON_DAYS, MAX_HORIZON_DAYS};
use crate::engine::service::DEFAULT_MAINTENANCE_PERIOD_DAYS;

const DEFAULT_DATABASE_URL: &str = "sqlite:lash_studio.db?mode=rwc";
/// Brasília time.
const DEFAULT_UTC_OFFSET_HOURS: i32 = -3;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub studio_utc_offset_hours: i32,
    pub availability_horizon_days: u32,
    pub maintenance_period_days: u32,
    /// CORS origin whitelist entry; any origin is allowed when unset.
    pub webapp_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let config = Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "PORT", 3000),
            studio_utc_offset_hours: parse_or(&lookup, "STUDIO_UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS),
            availability_horizon_days: parse_or(&lookup, "AVAILABILITY_HORIZON_DAYS", DEFAULT_HORIZON_DAYS),
            maintenance_period_days: parse_or(
                &lookup,
                "MAINTENANCE_PERIOD_DAYS",
                DEFAULT_MAINTENANCE_PERIOD_DAYS,
            ),
            webapp_url: lookup("WEBAPP_URL").filter(|url| !url.trim().is_empty()),
        };
        config.clamped()
    }

    fn clamped(mut self) -> Self {
        if self.availability_horizon_days == 0 || self.availability_horizon_days > MAX_HORIZON_DAYS {
            warn!(
                "AVAILABILITY_HORIZON_DAYS={} out of range 1..={}, using {}",
                self.availability_horizon_days, MAX_HORIZON_DAYS, DEFAULT_HORIZON_DAYS
            );
            self.availability_horizon_days = DEFAULT_HORIZON_DAYS;
        }
        if self.maintenance_period_days == 0 {
            warn!(
                "MAINTENANCE_PERIOD_DAYS must be positive, using {}",
                DEFAULT_MAINTENANCE_PERIOD_DAYS
            );
            self.maintenance_period_days = DEFAULT_MAINTENANCE_PERIOD_DAYS;
        }
        self
    }

    /// `DATABASE_URL=memory` runs on the volatile in-memory store.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", key, raw, default);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.studio_utc_offset_hours, -3);
        assert_eq!(config.availability_horizon_days, 60);
        assert_eq!(config.maintenance_period_days, 21);
        assert!(config.webapp_url.is_none());
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn memory_store_selector() {
        assert!(config(&[("DATABASE_URL", "memory")]).uses_memory_store());
        assert!(config(&[("DATABASE_URL", "MEMORY")]).uses_memory_store());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("STUDIO_UTC_OFFSET_HOURS", "0"),
            ("AVAILABILITY_HORIZON_DAYS", "30"),
            ("WEBAPP_URL", "https://studio.example"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.studio_utc_offset_hours, 0);
        assert_eq!(config.availability_horizon_days, 30);
        assert_eq!(config.webapp_url.as_deref(), Some("https://studio.example"));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config(&[
            ("PORT", "http"),
            ("AVAILABILITY_HORIZON_DAYS", "0"),
            ("MAINTENANCE_PERIOD_DAYS", "-5"),
            ("WEBAPP_URL", "  "),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.availability_horizon_days, 60);
        assert_eq!(config.maintenance_period_days, 21);
        assert!(config.webapp_url.is_none());
    }
}
