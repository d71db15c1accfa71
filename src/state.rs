// src/state.rs
use crate::services::Tracker;

/// Shared application state, constructed once in `main` and handed to every
/// handler as an `Extension<Arc<AppState>>`.
pub struct AppState {
    pub tracker: Tracker,
}
