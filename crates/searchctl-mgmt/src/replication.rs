use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use searchctl_client::{SettingScope, SettingsApi, TransportError};

pub const ALLOCATION_ENABLE_KEY: &str = "cluster.routing.allocation.enable";

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("cluster did not acknowledge allocation mode {0}")]
    Unacknowledged(ReplicationMode),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Shard-allocation mode: everything, or primaries only. Stopping replication
/// means primaries-only; starting it re-enables all allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    All,
    Primaries,
}

impl ReplicationMode {
    pub fn as_setting_value(&self) -> &'static str {
        match self {
            ReplicationMode::All => "all",
            ReplicationMode::Primaries => "primaries",
        }
    }
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_setting_value())
    }
}

pub struct ReplicationController {
    settings: Arc<dyn SettingsApi>,
}

impl ReplicationController {
    pub fn new(settings: Arc<dyn SettingsApi>) -> Self {
        Self { settings }
    }

    /// One settings write; returns the raw acknowledgement.
    pub async fn set_mode(&self, mode: ReplicationMode) -> Result<bool, TransportError> {
        self.settings
            .put_setting(
                SettingScope::Transient,
                ALLOCATION_ENABLE_KEY,
                Value::String(mode.as_setting_value().to_string()),
            )
            .await
    }

    /// Ack-checked variant: an unacknowledged write is a failure.
    pub async fn require_mode(&self, mode: ReplicationMode) -> Result<(), ReplicationError> {
        if self.set_mode(mode).await? {
            tracing::info!("allocation mode set to {}", mode);
            Ok(())
        } else {
            Err(ReplicationError::Unacknowledged(mode))
        }
    }
}
