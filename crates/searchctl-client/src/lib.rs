//! searchctl cluster client: settings facade, health polling, stats fetch over the
//! cluster's REST management API.

pub mod client;
pub mod health;
pub mod settings;
pub mod stats;

pub use client::{ClusterClient, TransportError};
pub use health::{ClusterHealth, HealthApi, HealthError, HealthStatus};
pub use settings::{ClusterSettings, SettingScope, SettingsApi};

pub use reqwest::Url;
