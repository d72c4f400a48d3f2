//! Orchestrator configuration, loaded from a mounted YAML file with sane
//! defaults when the mount is absent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

pub const DEFAULT_JOB_TIMEOUT_SECS: i64 = 600;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Namespace the orchestrator process runs in; local-cluster jobs land here.
    pub namespace: String,

    /// Hub-server proxy address used to reach attached clusters.
    #[serde(default)]
    pub hub_server_addr: String,

    /// Workspace root mounted into executor pods.
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Executor image selection.
    #[serde(default)]
    pub executor: ExecutorImageConfig,

    /// Seconds between workload observations during the wait phase.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorImageConfig {
    /// Fallback image when `build_os` has no entry.
    #[serde(default)]
    pub default_image: String,

    /// Executor image per `build_os` value.
    #[serde(default)]
    pub images: HashMap<String, String>,
}

fn default_workspace() -> String {
    "/workspace".to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "zadig".to_string(),
            hub_server_addr: String::new(),
            workspace: default_workspace(),
            executor: ExecutorImageConfig::default(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a mounted config file.
    pub fn from_mounted_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|err| Error::Config(format!("read {}: {err}", path.as_ref().display())))?;
        let config: OrchestratorConfig = serde_yaml::from_str(&raw)
            .map_err(|err| Error::Config(format!("parse {}: {err}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::Config("namespace must not be empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Executor image for `(build_os, image_from)`. A `custom` source uses
    /// the job's own image id; otherwise the `build_os` table decides.
    #[must_use]
    pub fn executor_image(&self, build_os: &str, image_from: &str, image_id: &str) -> String {
        if image_from == "custom" && !image_id.is_empty() {
            return image_id.to_string();
        }
        self.executor
            .images
            .get(build_os)
            .cloned()
            .unwrap_or_else(|| self.executor.default_image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn executor_image_prefers_custom_then_table() {
        let mut config = OrchestratorConfig::default();
        config.executor.default_image = "executor:base".to_string();
        config
            .executor
            .images
            .insert("focal".to_string(), "executor:focal".to_string());

        assert_eq!(config.executor_image("focal", "", ""), "executor:focal");
        assert_eq!(config.executor_image("jammy", "", ""), "executor:base");
        assert_eq!(config.executor_image("focal", "custom", "me/builder:1"), "me/builder:1");
    }
}
