//! Service configuration
//!
//! Defaults, optionally overridden by a TOML file, then by `PARLAY_*`
//! environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::service::{ParlayError, ParlayResult};

/// Tunables for [`ParlayService`](crate::service::ParlayService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParlayConfig {
    /// Session length when a new session does not specify one
    pub default_duration_minutes: u32,

    /// Participant cap when a new session does not specify one
    pub default_max_participants: u32,

    /// Floor watch tick period
    pub poll_interval_ms: u64,

    /// How long an ended session's engine stays registered
    pub engine_ttl_secs: u64,

    /// Grant the floor right after a bid when the bidder wins resolution
    pub auto_grant: bool,

    /// Let the floor watch grant the resolved winner when the floor is idle
    pub grant_on_tick: bool,

    /// Per-subscriber event buffer
    pub event_capacity: usize,
}

impl Default for ParlayConfig {
    fn default() -> Self {
        Self {
            default_duration_minutes: 60,
            default_max_participants: 6,
            poll_interval_ms: 1000,
            engine_ttl_secs: 3600,
            auto_grant: true,
            grant_on_tick: true,
            event_capacity: 256,
        }
    }
}

impl ParlayConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Read a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> ParlayResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&raw)?;
        debug!(path = %path.display(), "Loaded configuration file");
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(n) = env_parse("PARLAY_DEFAULT_DURATION_MINUTES") {
            self.default_duration_minutes = n;
        }
        if let Some(n) = env_parse("PARLAY_DEFAULT_MAX_PARTICIPANTS") {
            self.default_max_participants = n;
        }
        if let Some(n) = env_parse("PARLAY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = n;
        }
        if let Some(n) = env_parse("PARLAY_ENGINE_TTL_SECS") {
            self.engine_ttl_secs = n;
        }
        if let Some(n) = env_parse("PARLAY_EVENT_CAPACITY") {
            self.event_capacity = n;
        }
        if let Ok(val) = std::env::var("PARLAY_AUTO_GRANT") {
            self.auto_grant = parse_flag(&val);
        }
        if let Ok(val) = std::env::var("PARLAY_GRANT_ON_TICK") {
            self.grant_on_tick = parse_flag(&val);
        }
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> ParlayResult<()> {
        if self.default_duration_minutes == 0 {
            return Err(ParlayError::config("default_duration_minutes must be positive"));
        }
        if self.default_max_participants == 0 {
            return Err(ParlayError::config("default_max_participants must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ParlayError::config("poll_interval_ms must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(ParlayError::config("event_capacity must be positive"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// TTL as a chrono duration, saturating at the largest representable span
    pub fn engine_ttl(&self) -> chrono::Duration {
        i64::try_from(self.engine_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ParlayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), std::time::Duration::from_secs(1));
        assert_eq!(config.engine_ttl(), chrono::Duration::hours(1));
        assert!(config.auto_grant);
    }

    #[test]
    fn test_huge_engine_ttl_saturates() {
        let config = ParlayConfig {
            engine_ttl_secs: u64::MAX,
            ..ParlayConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.engine_ttl(), chrono::Duration::MAX);

        let config = ParlayConfig {
            engine_ttl_secs: i64::MAX as u64,
            ..ParlayConfig::default()
        };
        assert_eq!(config.engine_ttl(), chrono::Duration::MAX);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = 250").unwrap();
        writeln!(file, "auto_grant = false").unwrap();

        let config = ParlayConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert!(!config.auto_grant);
        assert_eq!(config.default_duration_minutes, 60);
    }

    #[test]
    fn test_load_rejects_zero_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = 0").unwrap();

        let err = ParlayConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ParlayError::Config { .. }));
    }

    #[test]
    fn test_load_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = \"fast\"").unwrap();
        assert!(matches!(
            ParlayConfig::load(file.path()),
            Err(ParlayError::Toml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ParlayConfig::load("/nonexistent/parlay.toml"),
            Err(ParlayError::Io(_))
        ));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
    }
}
