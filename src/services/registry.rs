// src/services/registry.rs
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{GeoPos, MovingState, UserState};

/// Authoritative map of user id to state.
///
/// One lock guards the whole map and every operation returns an owned
/// snapshot. The `_with` updates let a caller publish the new state while
/// the lock is still held, so publication order matches update order.
#[derive(Default)]
pub struct UserRegistry {
    users: Mutex<HashMap<String, UserState>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from previously persisted users. A later duplicate
    /// id replaces an earlier one.
    pub fn from_users(users: impl IntoIterator<Item = UserState>) -> Self {
        let users = users
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect();
        Self {
            users: Mutex::new(users),
        }
    }

    pub async fn get_or_create(&self, id: &str) -> UserState {
        let mut users = self.users.lock().await;
        entry(&mut users, id).clone()
    }

    pub async fn get(&self, id: &str) -> Option<UserState> {
        self.users.lock().await.get(id).cloned()
    }

    pub async fn apply_position_update(
        &self,
        id: &str,
        lat: f64,
        lon: f64,
        last: DateTime<Utc>,
    ) -> UserState {
        self.apply_position_update_with(id, lat, lon, last, |_| {}).await
    }

    /// Like [`apply_position_update`](Self::apply_position_update), but runs
    /// `on_applied` on the new state before the lock is released, so anything
    /// it publishes is ordered the same way as the updates themselves.
    pub async fn apply_position_update_with<F>(
        &self,
        id: &str,
        lat: f64,
        lon: f64,
        last: DateTime<Utc>,
        on_applied: F,
    ) -> UserState
    where
        F: FnOnce(&UserState),
    {
        let mut users = self.users.lock().await;
        let user = entry(&mut users, id);
        user.update_position(GeoPos::new(lat, lon), last);
        debug!(user = %id, lat, lon, track = user.history.len(), "position updated");
        on_applied(&*user);
        user.clone()
    }

    pub async fn apply_status_update(
        &self,
        id: &str,
        status: Option<&str>,
        moving_state: Option<MovingState>,
    ) -> UserState {
        self.apply_status_update_with(id, status, moving_state, |_| {})
            .await
    }

    pub async fn apply_status_update_with<F>(
        &self,
        id: &str,
        status: Option<&str>,
        moving_state: Option<MovingState>,
        on_applied: F,
    ) -> UserState
    where
        F: FnOnce(&UserState),
    {
        let mut users = self.users.lock().await;
        let user = entry(&mut users, id);
        user.update_status(status, moving_state);
        debug!(user = %id, status = ?status, moving_state = ?moving_state, "status updated");
        on_applied(&*user);
        user.clone()
    }

    pub async fn snapshot_all(&self) -> Vec<UserState> {
        self.users.lock().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.users.lock().await.len()
    }
}

fn entry<'a>(users: &'a mut HashMap<String, UserState>, id: &str) -> &'a mut UserState {
    users.entry(id.to_string()).or_insert_with(|| {
        info!(user = %id, "created new user");
        UserState::new(id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_identical_positions_leave_history_empty() {
        let registry = UserRegistry::new();
        registry.apply_position_update("alice", 10.0, 20.0, Utc::now()).await;
        let alice = registry.apply_position_update("alice", 10.0, 20.0, Utc::now()).await;

        assert!(alice.history.is_empty());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_move_archives_previous_position() {
        let registry = UserRegistry::new();
        registry.apply_position_update("bob", 1.0, 1.0, Utc::now()).await;
        let bob = registry.apply_position_update("bob", 2.0, 2.0, Utc::now()).await;

        assert_eq!(bob.history.to_ordered_sequence(), vec![GeoPos::new(1.0, 1.0)]);
        assert_eq!(registry.get("bob").await, Some(bob));
    }

    #[tokio::test]
    async fn test_status_update_keeps_unset_fields() {
        let registry = UserRegistry::new();
        registry
            .apply_status_update("carol", Some("lunch at km 40"), None)
            .await;
        let carol = registry
            .apply_status_update("carol", None, Some(MovingState::Puncture))
            .await;

        assert_eq!(carol.status, "lunch at km 40");
        assert_eq!(carol.moving_state, MovingState::Puncture);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = UserRegistry::new();
        let first = registry.get_or_create("dave").await;
        let second = registry.get_or_create("dave").await;

        assert_eq!(first, second);
        assert_eq!(registry.count().await, 1);
        assert!(registry.get("nobody").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_never_duplicates() {
        let registry = Arc::new(UserRegistry::new());
        let mut handles = Vec::new();

        for i in 0..200 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("rider-{}", i % 10);
                registry.get_or_create(&id).await;
                registry
                    .apply_position_update(&id, i as f64, 1.0, Utc::now())
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = registry.snapshot_all().await;
        let ids: HashSet<_> = snapshot.iter().map(|u| u.id.clone()).collect();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(ids.len(), 10);
        assert_eq!(registry.count().await, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_to_one_user_are_all_applied() {
        let registry = Arc::new(UserRegistry::new());
        let mut handles = Vec::new();

        for i in 1..=40 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .apply_position_update("erin", i as f64, i as f64, Utc::now())
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 40 distinct positions: the first write archives nothing, each of
        // the remaining 39 archives its predecessor.
        let erin = registry.get("erin").await.unwrap();
        assert_eq!(erin.history.len(), 39);
    }

    #[tokio::test]
    async fn test_on_applied_sees_new_state_under_lock() {
        let registry = UserRegistry::new();
        let mut seen = None;
        let returned = registry
            .apply_position_update_with("gail", 4.0, 5.0, Utc::now(), |user| {
                seen = Some(user.clone());
            })
            .await;

        assert_eq!(seen, Some(returned));
    }

    #[tokio::test]
    async fn test_from_users_indexes_by_id() {
        let registry = UserRegistry::from_users(vec![UserState::new("a"), UserState::new("b")]);
        assert_eq!(registry.count().await, 2);
        assert!(registry.get("a").await.is_some());
    }
}
