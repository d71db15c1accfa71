// src/models/update.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /updatepos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionUpdate {
    pub user_name: String,
    pub lat: f64,
    pub lon: f64,
    /// Observation time; the receive time is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
}

/// Body of `POST /updatestatus`. Empty fields mean "leave unchanged".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusUpdate {
    pub user_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub moving_state: String,
}

/// Sent to idle viewers so intermediaries keep the stream open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeepalivePing {
    pub alive: bool,
}

impl Default for KeepalivePing {
    fn default() -> Self {
        Self { alive: true }
    }
}
