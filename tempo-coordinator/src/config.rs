//! Coordinator configuration.
//!
//! Read from `~/.tempo/coordinator.yaml`. Every field has a default, so a
//! missing file or a partial file is fine:
//!
//! ```yaml
//! bind: 0.0.0.0:3000
//! launch_host: 10.0.0.12
//! ports: { min: 5000, max: 6000 }
//! launcher:
//!   kind: ssh
//!   user: ubuntu
//!   image: tempo-instance
//! reference:
//!   kind: timeapi
//! auto_sync_interval_secs: 60
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tempo_core::events::DEFAULT_EVENT_CAPACITY;
use tempo_core::PortRange;
use tempo_sync::http::TIMEAPI_URL;
use tempo_sync::EngineConfig;

use crate::error::{io_err, CoordinatorError};
use crate::paths::config_path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Address the HTTP façade listens on.
    pub bind: String,
    /// Host new instances are launched on and registered under.
    pub launch_host: String,
    pub ports: PortRange,
    pub launcher: LauncherConfig,
    pub launch_timeout_ms: u64,
    pub reference: ReferenceConfig,
    pub sync: EngineConfig,
    /// Run a round on this period when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_sync_interval_secs: Option<u64>,
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            launch_host: "127.0.0.1".to_string(),
            ports: PortRange::default(),
            launcher: LauncherConfig::default(),
            launch_timeout_ms: 60_000,
            reference: ReferenceConfig::default(),
            sync: EngineConfig::default(),
            auto_sync_interval_secs: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LauncherConfig {
    /// `ssh user@host sudo docker run ...`
    Ssh {
        user: String,
        #[serde(default = "default_ssh_port")]
        ssh_port: u16,
        #[serde(default = "default_image")]
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity_file: Option<PathBuf>,
    },
    /// Child process on this machine. Defaults to the running `tempo` binary.
    Local {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        program: Option<PathBuf>,
    },
}

impl Default for LauncherConfig {
    fn default() -> Self {
        LauncherConfig::Local { program: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceConfig {
    Timeapi {
        #[serde(default = "default_timeapi_url")]
        url: String,
    },
    System,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        ReferenceConfig::Timeapi {
            url: default_timeapi_url(),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_image() -> String {
    "tempo-instance".to_string()
}

fn default_timeapi_url() -> String {
    TIMEAPI_URL.to_string()
}

impl CoordinatorConfig {
    /// Load `~/.tempo/coordinator.yaml` under `home`, or defaults if absent.
    pub fn load(home: &Path) -> Result<Self, CoordinatorError> {
        Self::load_at(&config_path(home))
    }

    pub fn load_at(path: &Path) -> Result<Self, CoordinatorError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|source| CoordinatorError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, CoordinatorError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.ports.is_empty() {
            return Err(CoordinatorError::Config(format!(
                "port range {} is empty",
                self.ports
            )));
        }
        if self.sync.max_concurrency == 0 {
            return Err(CoordinatorError::Config(
                "sync.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(CoordinatorError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.launch_host.trim().is_empty() {
            return Err(CoordinatorError::Config("launch_host is empty".to_string()));
        }
        Ok(())
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.auto_sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
