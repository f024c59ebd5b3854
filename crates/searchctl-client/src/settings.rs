use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ClusterClient, Result, TransportError};

/// Which of the two cluster-wide settings scopes a write targets. Every write
/// targets exactly one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingScope {
    Transient,
    Persistent,
}

impl SettingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingScope::Transient => "transient",
            SettingScope::Persistent => "persistent",
        }
    }
}

/// Cluster-wide settings snapshot, flat dotted keys per scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default)]
    pub transient: BTreeMap<String, Value>,
    #[serde(default)]
    pub persistent: BTreeMap<String, Value>,
}

impl ClusterSettings {
    pub fn scope(&self, scope: SettingScope) -> &BTreeMap<String, Value> {
        match scope {
            SettingScope::Transient => &self.transient,
            SettingScope::Persistent => &self.persistent,
        }
    }

    pub fn get(&self, scope: SettingScope, key: &str) -> Option<&Value> {
        self.scope(scope).get(key)
    }
}

/// Read/write access to cluster-wide settings. The remote service is the
/// source of truth for value acceptance; a write is acknowledged explicitly,
/// never assumed.
#[async_trait]
pub trait SettingsApi: Send + Sync {
    async fn get_settings(&self) -> Result<ClusterSettings>;

    /// One remote write, no internal retry. Returns the raw acknowledgement.
    async fn put_setting(&self, scope: SettingScope, key: &str, value: Value) -> Result<bool>;
}

#[async_trait]
impl SettingsApi for ClusterClient {
    async fn get_settings(&self) -> Result<ClusterSettings> {
        let raw = self.get_json("/_cluster/settings?flat_settings=true").await?;
        serde_json::from_value(raw).map_err(|e| TransportError::Malformed {
            url: format!("{}/_cluster/settings", self.base_url()),
            reason: e.to_string(),
        })
    }

    async fn put_setting(&self, scope: SettingScope, key: &str, value: Value) -> Result<bool> {
        let mut entry = serde_json::Map::new();
        entry.insert(key.to_string(), value);
        let mut body = serde_json::Map::new();
        body.insert(scope.as_str().to_string(), Value::Object(entry));

        let response = self.put_json("/_cluster/settings", &Value::Object(body)).await?;
        response
            .get("acknowledged")
            .and_then(Value::as_bool)
            .ok_or_else(|| TransportError::Malformed {
                url: format!("{}/_cluster/settings", self.base_url()),
                reason: "settings update response carried no acknowledged field".to_string(),
            })
    }
}
