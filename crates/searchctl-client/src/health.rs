use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{ClusterClient, Result};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("unknown health column: {0}")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Green => "green",
            HealthStatus::Yellow => "yellow",
            HealthStatus::Red => "red",
        }
    }

    pub fn is_green(&self) -> bool {
        matches!(self, HealthStatus::Green)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cluster health snapshot. The shard counters are the convergence
/// signal: a settled cluster has all three at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub cluster_name: String,
    pub status: HealthStatus,
    pub timed_out: bool,
    pub number_of_nodes: u64,
    pub number_of_data_nodes: u64,
    pub active_primary_shards: u64,
    pub active_shards: u64,
    pub relocating_shards: u64,
    pub initializing_shards: u64,
    pub unassigned_shards: u64,
    #[serde(default)]
    pub number_of_pending_tasks: u64,
}

impl ClusterHealth {
    /// All summary columns, sorted lexically.
    pub const FIELDS: &'static [&'static str] = &[
        "active_primary_shards",
        "active_shards",
        "cluster_name",
        "initializing_shards",
        "number_of_data_nodes",
        "number_of_nodes",
        "number_of_pending_tasks",
        "relocating_shards",
        "status",
        "timed_out",
        "unassigned_shards",
    ];

    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "active_primary_shards" => self.active_primary_shards.to_string(),
            "active_shards" => self.active_shards.to_string(),
            "cluster_name" => self.cluster_name.clone(),
            "initializing_shards" => self.initializing_shards.to_string(),
            "number_of_data_nodes" => self.number_of_data_nodes.to_string(),
            "number_of_nodes" => self.number_of_nodes.to_string(),
            "number_of_pending_tasks" => self.number_of_pending_tasks.to_string(),
            "relocating_shards" => self.relocating_shards.to_string(),
            "status" => self.status.to_string(),
            "timed_out" => self.timed_out.to_string(),
            "unassigned_shards" => self.unassigned_shards.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Two-line tabular rendering of the requested columns: a header row and
    /// a value row, each value right-aligned to its header's width. Pure
    /// formatting over this snapshot.
    pub fn summary(&self, columns: &[&str]) -> std::result::Result<String, HealthError> {
        let mut cells = Vec::with_capacity(columns.len());
        for column in columns {
            let value = self
                .field(column)
                .ok_or_else(|| HealthError::UnknownColumn(column.to_string()))?;
            cells.push((*column, value));
        }
        Ok(render_table(&cells))
    }

    /// Summary over every column, sorted lexically.
    pub fn summary_all(&self) -> String {
        let cells: Vec<(&str, String)> = Self::FIELDS
            .iter()
            .map(|c| (*c, self.field(c).unwrap_or_default()))
            .collect();
        render_table(&cells)
    }
}

fn render_table(cells: &[(&str, String)]) -> String {
    let header: Vec<String> = cells.iter().map(|(name, _)| name.to_string()).collect();
    let values: Vec<String> = cells
        .iter()
        .map(|(name, value)| format!("{:>width$}", value, width = name.len()))
        .collect();
    format!("{}\n{}", header.join(" "), values.join(" "))
}

/// Narrow query surface for cluster health; a single synchronous fetch per
/// call, transport failures surfaced unfiltered.
#[async_trait]
pub trait HealthApi: Send + Sync {
    async fn health(&self) -> Result<ClusterHealth>;
}

#[async_trait]
impl HealthApi for ClusterClient {
    async fn health(&self) -> Result<ClusterHealth> {
        let raw = self.get_json("/_cluster/health").await?;
        serde_json::from_value(raw).map_err(|e| crate::client::TransportError::Malformed {
            url: format!("{}/_cluster/health", self.base_url()),
            reason: e.to_string(),
        })
    }
}
