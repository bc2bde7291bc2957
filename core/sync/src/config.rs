//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use notesync_common::{Error, RemotePath, Result};

use crate::retry::RetryConfig;
use crate::scheduler::SchedulerMode;

/// Configuration for an engine and the passes that run on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory on the remote that holds `notes/` and `images/`.
    pub remote_dir: String,
    /// Immediate retries for a single failed call.
    pub retry: RetryConfig,
    /// Schedule of the background connectivity retry loop.
    pub connectivity: RetryConfig,
    /// Upper bound for a single connectivity probe.
    pub probe_timeout: Duration,
    /// Maximum parallel image transfers within one pass.
    pub image_concurrency: usize,
    /// How the background scheduler triggers full passes.
    pub scheduler: SchedulerMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_dir: "/notesync".to_string(),
            retry: RetryConfig::default(),
            connectivity: RetryConfig::connectivity(),
            probe_timeout: Duration::from_secs(20),
            image_concurrency: 4,
            scheduler: SchedulerMode::Manual,
        }
    }
}

impl EngineConfig {
    /// Parsed base directory.
    pub fn base_dir(&self) -> Result<RemotePath> {
        RemotePath::parse(&self.remote_dir)
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let base = self.base_dir()?;
        if base.is_root() {
            return Err(Error::InvalidInput(
                "Remote directory must not be the server root".to_string(),
            ));
        }
        if self.image_concurrency == 0 {
            return Err(Error::InvalidInput(
                "image_concurrency must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(Error::InvalidInput("probe_timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_dir().unwrap().to_string(), "/notesync");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.connectivity.initial_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "remote_dir": "/Apps/notes" }"#).unwrap();
        assert_eq!(config.remote_dir, "/Apps/notes");
        assert_eq!(config.image_concurrency, 4);
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig {
            remote_dir: "/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.remote_dir = "/a/../b".to_string();
        assert!(config.validate().is_err());

        config.remote_dir = "/ok".to_string();
        config.image_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
