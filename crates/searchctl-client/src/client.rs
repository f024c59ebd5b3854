use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// HTTP client bound to one cluster endpoint. All remote access in the tool
/// goes through this type; it never retries on its own.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    http: reqwest::Client,
    base_url: String,
}

impl ClusterClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return Err(TransportError::Http { url, source: e }),
        };

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url,
                status: response.status(),
            });
        }

        match response.json().await {
            Ok(v) => Ok(v),
            Err(e) => Err(TransportError::Malformed {
                url,
                reason: e.to_string(),
            }),
        }
    }

    pub(crate) async fn put_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!("PUT {}", url);

        let response = match self.http.put(&url).json(body).send().await {
            Ok(r) => r,
            Err(e) => return Err(TransportError::Http { url, source: e }),
        };

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url,
                status: response.status(),
            });
        }

        match response.json().await {
            Ok(v) => Ok(v),
            Err(e) => Err(TransportError::Malformed {
                url,
                reason: e.to_string(),
            }),
        }
    }
}
