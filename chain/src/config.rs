//! Node configuration. Every field has a default, so an empty JSON object
//! (or no file at all) yields a working node.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analyzer::AdmissionPolicy;
use crate::economy::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_VOTING_WINDOW_SECS};
use crate::error::{ChainError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Commits between full checkpoints; the journal holds the rest.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    #[serde(default)]
    pub admission: AdmissionPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_checkpoint_interval() -> u64 {
    64
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_voting_window")]
    pub voting_window_secs: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_voting_window() -> u64 {
    DEFAULT_VOTING_WINDOW_SECS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            voting_window_secs: default_voting_window(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            checkpoint_interval: default_checkpoint_interval(),
            admission: AdmissionPolicy::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| ChainError::Config(format!("{}: {e}", path.display())))?;
        let config: NodeConfig = serde_json::from_str(&raw)
            .map_err(|e| ChainError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.admission.validate()?;
        if self.checkpoint_interval == 0 {
            return Err(ChainError::Config("checkpoint_interval must be positive".into()));
        }
        if i64::try_from(self.scheduler.voting_window_secs).is_err() {
            return Err(ChainError::Config(format!(
                "voting_window_secs {} out of range",
                self.scheduler.voting_window_secs
            )));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ChainError::Config("poll_interval_secs must be positive".into()));
        }
        Ok(())
    }
}
