//! Configuration management for Sluice.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ratelimit::{BucketParams, MemoryBackend};

/// Prefix for environment overrides, e.g. `SLUICE__LIMITER__BURST=20`.
const ENV_PREFIX: &str = "SLUICE";

/// Main configuration for Sluice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// Leaky-bucket parameters
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Storage backend configuration
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Leaky-bucket parameters shared by every key of one limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Units restored per interval
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Refill interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Maximum units a bucket can hold
    #[serde(default = "default_burst")]
    pub burst: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            interval_ms: default_interval_ms(),
            burst: default_burst(),
        }
    }
}

impl LimiterConfig {
    /// The refill interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Check that every parameter is positive.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(Error::Config("limiter.rate must be positive".into()));
        }
        if self.interval_ms == 0 {
            return Err(Error::Config("limiter.interval_ms must be positive".into()));
        }
        if self.burst == 0 {
            return Err(Error::Config("limiter.burst must be positive".into()));
        }
        Ok(())
    }
}

fn default_rate() -> u64 {
    1
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_burst() -> u64 {
    10
}

/// In-memory backend configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Expire buckets this many seconds after their last write
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl BackendConfig {
    /// Build the in-memory backend described by this configuration.
    pub fn build_memory(&self) -> MemoryBackend {
        match self.ttl_secs {
            Some(secs) => MemoryBackend::with_ttl(Duration::from_secs(secs)),
            None => MemoryBackend::new(),
        }
    }
}

impl SluiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SluiceConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overridden by `SLUICE__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: SluiceConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check the limiter parameters, and that a backend TTL never forgets a
    /// bucket before it could have refilled completely.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;

        if let Some(ttl_secs) = self.backend.ttl_secs {
            let params =
                BucketParams::new(self.limiter.rate, self.limiter.interval(), self.limiter.burst)?;
            let refill = params.full_refill_period();
            if Duration::from_secs(ttl_secs) < refill {
                return Err(Error::Config(format!(
                    "backend.ttl_secs ({}) is shorter than the full refill period {:?}",
                    ttl_secs, refill
                )));
            }
        }
        Ok(())
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SluiceConfig::default();

        assert_eq!(config.limiter.rate, 1);
        assert_eq!(config.limiter.interval(), Duration::from_secs(1));
        assert_eq!(config.limiter.burst, 10);
        assert_eq!(config.backend.ttl_secs, None);
        assert!(config.limiter.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
limiter:
  rate: 5
  interval_ms: 250
  burst: 40
backend:
  ttl_secs: 3600
"#;
        let config = SluiceConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.limiter.rate, 5);
        assert_eq!(config.limiter.interval(), Duration::from_millis(250));
        assert_eq!(config.limiter.burst, 40);
        assert_eq!(config.backend.ttl_secs, Some(3600));
        assert_eq!(
            config.backend.build_memory().ttl(),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = SluiceConfig::from_yaml("limiter:\n  burst: 3\n").unwrap();

        assert_eq!(config.limiter.rate, 1);
        assert_eq!(config.limiter.interval_ms, 1000);
        assert_eq!(config.limiter.burst, 3);
    }

    #[test]
    fn test_zero_values_rejected() {
        let err = SluiceConfig::from_yaml("limiter:\n  rate: 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("rate")));

        let err = SluiceConfig::from_yaml("limiter:\n  interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("interval_ms")));

        let err = SluiceConfig::from_yaml("limiter:\n  burst: 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("burst")));
    }

    #[test]
    fn test_ttl_shorter_than_refill_rejected() {
        let yaml = r#"
limiter:
  rate: 1
  interval_ms: 60000
  burst: 1
backend:
  ttl_secs: 0
"#;
        let err = SluiceConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("ttl_secs")));

        // Default limiter needs 10s to refill
        let err = SluiceConfig::from_yaml("backend:\n  ttl_secs: 9\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_ttl_covering_refill_accepted() {
        let config = SluiceConfig::from_yaml("backend:\n  ttl_secs: 10\n").unwrap();
        assert_eq!(config.backend.ttl_secs, Some(10));

        let limiter =
            crate::ratelimit::Limiter::from_config(&config.limiter, config.backend.build_memory());
        assert!(limiter.is_ok());
    }

    #[test]
    fn test_from_missing_file_is_io_error() {
        let err = SluiceConfig::from_file("/nonexistent/sluice.yaml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("sluice-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "limiter:\n  rate: 7\n  burst: 70\n").unwrap();

        let config = SluiceConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limiter.rate, 7);
        assert_eq!(config.limiter.interval_ms, 1000);
        assert_eq!(config.limiter.burst, 70);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = SluiceConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(SluiceConfig::from_yaml(&yaml).unwrap(), config);
    }
}
