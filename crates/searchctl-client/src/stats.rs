use serde_json::Value;

use crate::client::{ClusterClient, Result};

/// Statistics endpoints return arbitrary nested payloads; the client hands
/// them back raw and rendering happens elsewhere.
impl ClusterClient {
    pub async fn node_stats(&self, node: Option<&str>) -> Result<Value> {
        let path = match node {
            Some(node) => format!("/_nodes/{node}/stats"),
            None => "/_nodes/stats".to_string(),
        };
        self.get_json(&path).await
    }

    pub async fn cluster_stats(&self, node: Option<&str>) -> Result<Value> {
        let path = match node {
            Some(node) => format!("/_cluster/stats/nodes/{node}"),
            None => "/_cluster/stats".to_string(),
        };
        self.get_json(&path).await
    }
}
