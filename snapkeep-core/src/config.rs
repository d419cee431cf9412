//! Configuration module for backup targets and run notification
//!
//! The configuration is read once at startup from a JSON file and passed
//! into the orchestrator by reference. Each entry of `targets` describes one
//! volume, the credentials used to reach it, and how long its snapshots are
//! kept.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::retention::{DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use crate::{Result, SnapkeepError};

/// Region used when a target does not name one.
pub const DEFAULT_REGION: &str = "ap-southeast-1";

/// Configuration file consulted when neither `--config` nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "snapkeep.json";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Static access key pair for one target
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Per-target settings as they appear in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// AWS region of the volume (defaults to `ap-southeast-1`)
    #[serde(default = "default_region")]
    pub region: String,
    /// EBS volume to snapshot
    pub volume_id: String,
    pub credentials: CredentialConfig,
    /// Days a non-newest snapshot is kept (defaults to 7)
    #[serde(default)]
    pub retention_days: Option<u32>,
}

/// Where the run transcript goes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Mail recipients; the transcript goes to stdout when empty
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapkeepConfig {
    #[serde(default)]
    pub log: LogConfig,
    /// Targets keyed by name; processed in name order
    pub targets: BTreeMap<String, TargetConfig>,
}

/// One resolved unit of work for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub name: String,
    pub region: String,
    pub volume_id: String,
    pub credentials: CredentialConfig,
    pub retention_days: u32,
}

impl SnapkeepConfig {
    /// Parse a configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SnapkeepConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate the configuration file at `path`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SnapkeepError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(SnapkeepError::validation(
                "configuration must define at least one target",
            ));
        }

        for (name, target) in &self.targets {
            if name.trim().is_empty() {
                return Err(SnapkeepError::validation("target name must not be empty"));
            }
            if target.volume_id.trim().is_empty() {
                return Err(SnapkeepError::validation(format!(
                    "target '{name}' requires a volume_id"
                )));
            }
            if target.region.trim().is_empty() {
                return Err(SnapkeepError::validation(format!(
                    "target '{name}' has an empty region"
                )));
            }
            if target.credentials.access_key_id.is_empty()
                || target.credentials.secret_access_key.is_empty()
            {
                return Err(SnapkeepError::validation(format!(
                    "target '{name}' requires access_key_id and secret_access_key"
                )));
            }
            if let Some(days) = target.retention_days.filter(|d| *d > MAX_RETENTION_DAYS) {
                return Err(SnapkeepError::validation(format!(
                    "target '{name}' retention_days {days} exceeds {MAX_RETENTION_DAYS}"
                )));
            }
        }

        for recipient in &self.log.recipients {
            if recipient.trim().is_empty() {
                return Err(SnapkeepError::validation(
                    "log recipients must not contain empty addresses",
                ));
            }
            // the address lands verbatim in the To: header
            if recipient.contains(['\r', '\n']) {
                return Err(SnapkeepError::validation(format!(
                    "log recipient {recipient:?} contains a line break"
                )));
            }
        }

        Ok(())
    }

    /// Targets with defaults applied, in processing order
    pub fn targets(&self) -> Vec<BackupTarget> {
        self.targets
            .iter()
            .map(|(name, target)| BackupTarget {
                name: name.clone(),
                region: target.region.clone(),
                volume_id: target.volume_id.clone(),
                credentials: target.credentials.clone(),
                retention_days: target.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            })
            .collect()
    }

    pub fn recipients(&self) -> &[String] {
        &self.log.recipients
    }
}
