use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use searchctl_client::{SettingScope, SettingsApi, TransportError};

pub const EXCLUDE_IP_KEY: &str = "cluster.routing.allocation.exclude._ip";
pub const EXCLUDE_NAME_KEY: &str = "cluster.routing.allocation.exclude._name";

#[derive(Debug, Error)]
pub enum ExclusionError {
    #[error("node must be a non-empty address or hostname")]
    EmptyNode,

    #[error("cluster did not acknowledge the exclusion update for {node}")]
    Unacknowledged { node: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Identifier class of a node token. A token that parses as an IPv4/IPv6
/// literal is an address; any other non-empty token is a hostname. The class
/// selects which exclusion list the token lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Address,
    Hostname,
}

impl NodeClass {
    pub fn classify(token: &str) -> Result<Self, ExclusionError> {
        if token.is_empty() {
            return Err(ExclusionError::EmptyNode);
        }
        if token.parse::<IpAddr>().is_ok() {
            Ok(NodeClass::Address)
        } else {
            Ok(NodeClass::Hostname)
        }
    }

    pub fn setting_key(&self) -> &'static str {
        match self {
            NodeClass::Address => EXCLUDE_IP_KEY,
            NodeClass::Hostname => EXCLUDE_NAME_KEY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanOutcome {
    Banned,
    AlreadyBanned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbanOutcome {
    Unbanned,
    NotBanned,
}

/// Maintains the allocation exclusion lists. Membership checks make ban and
/// unban idempotent: a no-op never writes to the cluster.
pub struct BannedNodeSetManager {
    settings: Arc<dyn SettingsApi>,
}

impl BannedNodeSetManager {
    pub fn new(settings: Arc<dyn SettingsApi>) -> Self {
        Self { settings }
    }

    /// Current exclusion list for one identifier class, in remote order.
    /// An absent key or empty string is the empty set, not an error.
    pub async fn banned(&self, class: NodeClass) -> Result<Vec<String>, ExclusionError> {
        let settings = self.settings.get_settings().await?;
        Ok(parse_exclusion_list(
            settings.get(SettingScope::Transient, class.setting_key()),
        ))
    }

    pub async fn ban(&self, token: &str) -> Result<BanOutcome, ExclusionError> {
        let class = NodeClass::classify(token)?;
        let mut excluded = self.banned(class).await?;

        if excluded.iter().any(|t| t == token) {
            tracing::debug!("{} is already excluded from allocation", token);
            return Ok(BanOutcome::AlreadyBanned);
        }

        excluded.push(token.to_string());
        self.write(class, &excluded, token).await?;
        tracing::info!("excluded {} from shard allocation", token);
        Ok(BanOutcome::Banned)
    }

    pub async fn unban(&self, token: &str) -> Result<UnbanOutcome, ExclusionError> {
        let class = NodeClass::classify(token)?;
        let excluded = self.banned(class).await?;

        if !excluded.iter().any(|t| t == token) {
            tracing::debug!("{} is not excluded from allocation", token);
            return Ok(UnbanOutcome::NotBanned);
        }

        let remaining: Vec<String> = excluded.into_iter().filter(|t| t != token).collect();
        self.write(class, &remaining, token).await?;
        tracing::info!("readmitted {} to shard allocation", token);
        Ok(UnbanOutcome::Unbanned)
    }

    async fn write(
        &self,
        class: NodeClass,
        excluded: &[String],
        node: &str,
    ) -> Result<(), ExclusionError> {
        let acknowledged = self
            .settings
            .put_setting(
                SettingScope::Transient,
                class.setting_key(),
                Value::String(excluded.join(",")),
            )
            .await?;

        if !acknowledged {
            return Err(ExclusionError::Unacknowledged {
                node: node.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_exclusion_list(value: Option<&Value>) -> Vec<String> {
    let Some(raw) = value.and_then(Value::as_str) else {
        return Vec::new();
    };
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
