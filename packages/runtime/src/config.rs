//! Configuration for the Process and the controllers.
//!
//! Timeouts are stored as seconds so the structs read naturally from JSON;
//! a missing or negative value means "wait indefinitely".

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

fn seconds(value: Option<f64>) -> Option<Duration> {
    value.filter(|s| *s >= 0.0).map(Duration::from_secs_f64)
}

/// Configuration for a [`Process`](crate::Process).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Name used in log output.
    pub name: String,
    /// Limit for process-phase hooks (start, stop, publish).
    pub hook_timeout: Option<f64>,
    /// Limit for outstanding spawned tasks at stop.
    pub stop_timeout: Option<f64>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: "Process".to_string(),
            hook_timeout: Some(10.0),
            stop_timeout: Some(10.0),
        }
    }
}

impl ProcessConfig {
    /// Read a config from a JSON document; absent keys take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        seconds(self.hook_timeout)
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        seconds(self.stop_timeout)
    }
}

/// Configuration for a [`ManagerController`](crate::ManagerController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Root directory for saved designs.
    pub config_dir: PathBuf,
    /// Design loaded at init, if not empty.
    pub initial_design: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/tmp/malcolm"),
            initial_design: String::new(),
        }
    }
}

/// Configuration for a [`RunnableController`](crate::RunnableController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnableConfig {
    #[serde(flatten)]
    pub manager: ManagerConfig,
    /// Limit for a single phase of configure/run/seek, in seconds.
    pub request_timeout: Option<f64>,
}

impl Default for RunnableConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            request_timeout: None,
        }
    }
}

impl RunnableConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        seconds(self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_config_from_json() {
        let config = ProcessConfig::from_json(r#"{"name": "beamline", "hookTimeout": 2.5}"#)
            .unwrap();
        assert_eq!(config.name, "beamline");
        assert_eq!(config.hook_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.stop_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn negative_timeout_waits_forever() {
        let config = ProcessConfig {
            hook_timeout: Some(-1.0),
            stop_timeout: None,
            ..Default::default()
        };
        assert_eq!(config.hook_timeout(), None);
        assert_eq!(config.stop_timeout(), None);
        assert!(ProcessConfig::from_json("[1, 2]").is_err());
    }

    #[test]
    fn runnable_config_flattens_manager() {
        let config: RunnableConfig =
            serde_json::from_str(r#"{"configDir": "/data", "initialDesign": "fast"}"#).unwrap();
        assert_eq!(config.manager.config_dir, PathBuf::from("/data"));
        assert_eq!(config.manager.initial_design, "fast");
        assert_eq!(config.request_timeout(), None);
    }
}
