use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::restart::RestartPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MgmtConfig {
    /// Cluster endpoint this invocation targets.
    pub server: String,
    /// systemd unit bounced by `restart-fast`.
    pub service_unit: String,
    pub request_timeout_secs: u64,
    pub alive_poll_secs: u64,
    pub settle_delay_secs: u64,
    pub green_poll_secs: u64,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            server: String::from("http://localhost:9200"),
            service_unit: String::from("searchd"),
            request_timeout_secs: 30,
            alive_poll_secs: 1,
            settle_delay_secs: 5,
            green_poll_secs: 30,
        }
    }
}

impl MgmtConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MgmtConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MgmtConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            alive_poll_interval: Duration::from_secs(self.alive_poll_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            green_poll_interval: Duration::from_secs(self.green_poll_secs),
        }
    }
}
