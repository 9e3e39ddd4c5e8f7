//! Engine configuration (SPEC_FULL §5.C).
//!
//! A plain `serde`-derived struct persisted as TOML alongside the app DB,
//! following the shape of the teacher codebase's own `Config` (load-or-
//! default from the platform config directory, save back as TOML).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Backoff tunables for one kind of retry loop (§4.5, §5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay in milliseconds, used for attempt 1.
    pub base_ms: u64,
    /// Upper bound on the delay, regardless of attempt count.
    pub max_ms: u64,
}

impl BackoffConfig {
    /// Generic retry backoff: base 5s, max 10 minutes (§4.5).
    pub fn generic() -> Self {
        Self {
            base_ms: 5_000,
            max_ms: 10 * 60 * 1_000,
        }
    }

    /// Socket reconnection backoff: base 5s, max 1 minute (§4.5).
    pub fn socket() -> Self {
        Self {
            base_ms: 5_000,
            max_ms: 60 * 1_000,
        }
    }

    /// `delay(n) = min(base * 2^(n-1), max)` for attempt `n >= 1`; `delay(0) = 0` (§8 property 7).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let scaled = self.base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(62));
        Duration::from_millis(scaled.min(self.max_ms))
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for all persisted state (§6).
    pub app_dir: std::path::PathBuf,
    /// HTTP request timeout, default 30s (§5).
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
    /// Number of retries before a mutation is dead-lettered (§4.3).
    pub mutation_retry_ceiling: u32,
    /// Interval between cleanup task runs, default 10 minutes (§5).
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    /// Debounce window for the cleanup task, default 1 minute (§5).
    #[serde(with = "duration_secs")]
    pub cleanup_debounce: Duration,
    /// Backoff tunables for generic retry loops.
    pub generic_backoff: BackoffConfig,
    /// Backoff tunables for socket reconnection.
    pub socket_backoff: BackoffConfig,
}

impl EngineConfig {
    /// Defaults matching the values named throughout §4 and §5 of the spec.
    pub fn with_app_dir(app_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            http_timeout: Duration::from_secs(30),
            mutation_retry_ceiling: 5,
            cleanup_interval: Duration::from_secs(10 * 60),
            cleanup_debounce: Duration::from_secs(60),
            generic_backoff: BackoffConfig::generic(),
            socket_backoff: BackoffConfig::socket(),
        }
    }

    /// Load from a TOML file, or return `None` if it doesn't exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(toml::from_str(&contents)?))
    }

    /// Load from disk, or fall back to defaults rooted at `app_dir` if the
    /// config file doesn't exist yet.
    pub fn load_or_default(path: &Path, app_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        match Self::load(path)? {
            Some(config) => Ok(config),
            None => Ok(Self::with_app_dir(app_dir)),
        }
    }

    /// Persist to disk as TOML, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_formula_matches_spec_property_7() {
        let backoff = BackoffConfig {
            base_ms: 1_000,
            max_ms: 32_000,
        };
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(3), Duration::from_millis(4_000));
        assert_eq!(backoff.delay(10), Duration::from_millis(32_000));
    }

    #[test]
    fn socket_backoff_caps_at_one_minute() {
        let backoff = BackoffConfig::socket();
        assert_eq!(backoff.delay(20), Duration::from_secs(60));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = EngineConfig::with_app_dir(dir.path());
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap().unwrap();
        assert_eq!(loaded.mutation_retry_ceiling, config.mutation_retry_ceiling);
        assert_eq!(loaded.http_timeout, config.http_timeout);
    }

    #[test]
    fn load_or_default_falls_back_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = EngineConfig::load_or_default(&path, dir.path()).unwrap();
        assert_eq!(config.app_dir, dir.path());
    }
}
