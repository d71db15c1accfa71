// src/services/ingest.rs
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::config::FanoutConfig;
use crate::error::ApiError;
use crate::models::{MovingState, PositionUpdate, StatusUpdate, UserState};
use crate::services::fanout::{EventFanout, SubscriberFeed};
use crate::services::persistence::{PersistenceManager, StateSaver};
use crate::services::registry::UserRegistry;

/// Owns the registry, the viewer fan-out and the state file.
///
/// Every accepted update is applied to the registry and broadcast to viewers
/// under the registry lock, then handed to the background saver. A failed
/// save is logged; the in-memory state stays authoritative and the next
/// update retries.
pub struct Tracker {
    registry: Arc<UserRegistry>,
    fanout: Arc<EventFanout>,
    saver: Option<StateSaver>,
    fanout_config: FanoutConfig,
    max_status: Option<usize>,
}

impl Tracker {
    /// Must be called inside a tokio runtime when `persistence` is set, as it
    /// spawns the saver task.
    pub fn new(registry: UserRegistry, persistence: Option<PersistenceManager>) -> Self {
        let registry = Arc::new(registry);
        let saver = persistence
            .map(|persistence| StateSaver::spawn(Arc::new(persistence), registry.clone()));

        Self {
            registry,
            fanout: EventFanout::new(),
            saver,
            fanout_config: FanoutConfig::default(),
            max_status: None,
        }
    }

    pub fn with_fanout_config(mut self, config: FanoutConfig) -> Self {
        self.fanout_config = config;
        self
    }

    pub fn with_max_status(mut self, max_status: Option<usize>) -> Self {
        self.max_status = max_status;
        self
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    pub fn fanout(&self) -> &Arc<EventFanout> {
        &self.fanout
    }

    /// Opens a live feed for a newly connected viewer.
    pub fn subscribe(&self, peer: impl Into<String>) -> SubscriberFeed {
        SubscriberFeed::new(self.fanout.register(peer), self.fanout_config)
    }

    pub async fn update_position(&self, update: PositionUpdate) -> Result<UserState, ApiError> {
        validate_user_name(&update.user_name)?;
        if !(-90.0..=90.0).contains(&update.lat) || !(-180.0..=180.0).contains(&update.lon) {
            return Err(ApiError::BadRequest(format!(
                "coordinates out of range: lat {}, lon {}",
                update.lat, update.lon
            )));
        }

        let last = update.last.unwrap_or_else(Utc::now);
        let fanout = &self.fanout;
        let snapshot = self
            .registry
            .apply_position_update_with(&update.user_name, update.lat, update.lon, last, |user| {
                fanout.broadcast(user);
            })
            .await;

        info!(user = %update.user_name, lat = update.lat, lon = update.lon, "position update");
        self.request_save();
        Ok(snapshot)
    }

    pub async fn update_status(&self, update: StatusUpdate) -> Result<UserState, ApiError> {
        validate_user_name(&update.user_name)?;

        let status = non_empty(&update.status);
        if let (Some(status), Some(max)) = (status, self.max_status) {
            if status.chars().count() > max {
                return Err(ApiError::BadRequest(format!(
                    "status too long: at most {max} characters allowed"
                )));
            }
        }

        let moving_state = non_empty(&update.moving_state)
            .map(str::parse::<MovingState>)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let fanout = &self.fanout;
        let snapshot = self
            .registry
            .apply_status_update_with(&update.user_name, status, moving_state, |user| {
                fanout.broadcast(user);
            })
            .await;

        info!(user = %update.user_name, status = ?status, moving_state = ?moving_state, "status update");
        self.request_save();
        Ok(snapshot)
    }

    /// Waits until every save requested so far has been attempted.
    pub async fn flush(&self) {
        if let Some(saver) = &self.saver {
            saver.flush().await;
        }
    }

    fn request_save(&self) {
        if let Some(saver) = &self.saver {
            saver.request();
        }
    }
}

fn validate_user_name(user_name: &str) -> Result<(), ApiError> {
    if user_name.trim().is_empty() {
        return Err(ApiError::BadRequest("UserName must not be empty".to_string()));
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}
