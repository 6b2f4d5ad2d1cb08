//! Process configuration read from `PLAYPULSE_*` environment variables.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.appmetrica.yandex.com";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Configuration loading error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Everything the ingestion service needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// `None` runs against the in-memory store (development only).
    pub database_url: Option<String>,
    pub provider_base_url: String,
    pub bind_addr: String,
    pub scheduler_tick: Duration,
    pub dispatch_tick: Duration,
    pub schedule_grace: Duration,
    pub window_delay_minutes: u32,
    /// Offset of the wall clock schedule anchors are written in.
    pub local_offset: FixedOffset,
    /// Offset of the clock the provider interprets `date_since`/`date_until` in.
    pub provider_offset: FixedOffset,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            provider_base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            scheduler_tick: Duration::from_secs(60),
            dispatch_tick: Duration::from_secs(20),
            schedule_grace: Duration::from_secs(300),
            window_delay_minutes: 90,
            local_offset: offset_minutes(7 * 60).unwrap_or(utc()),
            provider_offset: utc(),
            max_attempts: 18,
            poll_interval: Duration::from_secs(180),
            backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(600),
        }
    }
}

impl IngestConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let config = Self {
            database_url: get("PLAYPULSE_DATABASE_URL").or_else(|| get("DATABASE_URL")),
            provider_base_url: get("PLAYPULSE_PROVIDER_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.provider_base_url),
            bind_addr: get("PLAYPULSE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            scheduler_tick: secs(&get, "PLAYPULSE_SCHEDULER_TICK_SECS", defaults.scheduler_tick)?,
            dispatch_tick: secs(&get, "PLAYPULSE_DISPATCH_TICK_SECS", defaults.dispatch_tick)?,
            schedule_grace: secs(&get, "PLAYPULSE_SCHEDULE_GRACE_SECS", defaults.schedule_grace)?,
            window_delay_minutes: number(
                &get,
                "PLAYPULSE_WINDOW_DELAY_MINUTES",
                defaults.window_delay_minutes,
            )?,
            local_offset: offset(&get, "PLAYPULSE_LOCAL_UTC_OFFSET_MINUTES", defaults.local_offset)?,
            provider_offset: offset(
                &get,
                "PLAYPULSE_PROVIDER_UTC_OFFSET_MINUTES",
                defaults.provider_offset,
            )?,
            max_attempts: number(&get, "PLAYPULSE_MAX_ATTEMPTS", defaults.max_attempts)?,
            poll_interval: secs(&get, "PLAYPULSE_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            backoff: secs(&get, "PLAYPULSE_BACKOFF_SECS", defaults.backoff)?,
            request_timeout: secs(&get, "PLAYPULSE_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("PLAYPULSE_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        for (var, value) in [
            ("PLAYPULSE_SCHEDULER_TICK_SECS", self.scheduler_tick),
            ("PLAYPULSE_DISPATCH_TICK_SECS", self.dispatch_tick),
            ("PLAYPULSE_REQUEST_TIMEOUT_SECS", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(var, "0", "must be positive"));
            }
        }
        Ok(())
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn offset_minutes(minutes: i32) -> Option<FixedOffset> {
    minutes.checked_mul(60).and_then(FixedOffset::east_opt)
}

fn number<G, T>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(var, raw.clone(), e.to_string())),
    }
}

fn secs<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    number(get, var, default.as_secs()).map(Duration::from_secs)
}

fn offset<G>(get: &G, var: &'static str, default: FixedOffset) -> Result<FixedOffset, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let minutes: i32 = number(get, var, default.local_minus_utc() / 60)?;
    offset_minutes(minutes)
        .ok_or_else(|| ConfigError::invalid(var, minutes.to_string(), "offset out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<IngestConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.local_offset.local_minus_utc(), 7 * 3600);
        assert_eq!(config.max_attempts, 18);
        assert_eq!(config.schedule_grace, Duration::from_secs(300));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/playpulse"),
            ("PLAYPULSE_POLL_INTERVAL_SECS", "5"),
            ("PLAYPULSE_LOCAL_UTC_OFFSET_MINUTES", "-300"),
            ("PLAYPULSE_PROVIDER_BASE_URL", "http://127.0.0.1:9000/"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/playpulse"));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.local_offset.local_minus_utc(), -300 * 60);
        assert_eq!(config.provider_base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn garbage_is_rejected() {
        let err = load(&[("PLAYPULSE_MAX_ATTEMPTS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PLAYPULSE_MAX_ATTEMPTS", .. }));

        assert!(load(&[("PLAYPULSE_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("PLAYPULSE_DISPATCH_TICK_SECS", "0")]).is_err());
        assert!(load(&[("PLAYPULSE_LOCAL_UTC_OFFSET_MINUTES", "100000")]).is_err());
    }
}
