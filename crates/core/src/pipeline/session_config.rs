use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::domain::cluster_engine::ClusterParams;
use crate::shared::constants::{
    DEFAULT_COOLDOWN_SECONDS, DEFAULT_EPS, DEFAULT_MIN_SAMPLES, DEFAULT_RECLUSTER_BATCH_SIZE,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Tunables of a recognition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub eps: f64,
    pub min_samples: usize,
    pub recluster_batch_size: usize,
    pub cooldown_seconds: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            eps: DEFAULT_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
            recluster_batch_size: DEFAULT_RECLUSTER_BATCH_SIZE,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
        }
    }
}

impl SessionConfig {
    /// `<config dir>/FaceLedger/session.json`, when the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceLedger").join("session.json"))
    }

    /// Reads and validates a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        fs::write(path, json).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "eps must be a positive number, got {}",
                self.eps
            )));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::Invalid("min_samples must be at least 1".into()));
        }
        if self.recluster_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "recluster_batch_size must be at least 1".into(),
            ));
        }
        validate_cooldown(self.cooldown_seconds)?;
        Ok(())
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            eps: self.eps,
            min_samples: self.min_samples,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_seconds)
    }
}

/// Any positive, finite number of seconds is a valid cooldown.
pub fn validate_cooldown(seconds: f64) -> Result<Duration, ConfigError> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "cooldown must be a positive number of seconds, got {seconds}"
        )));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| ConfigError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.eps, 0.5);
        assert_eq!(config.min_samples, 3);
        assert_eq!(config.recluster_batch_size, 10);
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("session.json");
        let config = SessionConfig {
            eps: 0.6,
            min_samples: 4,
            recluster_batch_size: 5,
            cooldown_seconds: 12.5,
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, r#"{"cooldown_seconds": 5}"#).unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.cooldown(), Duration::from_secs(5));
        assert_eq!(config.min_samples, DEFAULT_MIN_SAMPLES);
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SessionConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SessionConfig::load(&dir.path().join("absent.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[rstest]
    #[case(SessionConfig { eps: 0.0, ..SessionConfig::default() })]
    #[case(SessionConfig { eps: f64::NAN, ..SessionConfig::default() })]
    #[case(SessionConfig { min_samples: 0, ..SessionConfig::default() })]
    #[case(SessionConfig { recluster_batch_size: 0, ..SessionConfig::default() })]
    #[case(SessionConfig { cooldown_seconds: 0.0, ..SessionConfig::default() })]
    #[case(SessionConfig { cooldown_seconds: -5.0, ..SessionConfig::default() })]
    fn test_invalid_configs_are_rejected(#[case] config: SessionConfig) {
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    #[case(0.25)]
    #[case(5.0)]
    #[case(3600.0)]
    fn test_any_positive_cooldown_is_accepted(#[case] seconds: f64) {
        assert_eq!(
            validate_cooldown(seconds).unwrap(),
            Duration::from_secs_f64(seconds)
        );
    }
}
