// src/lib.rs
// Live position relay: participants report positions and statuses over
// HTTP; the latest state of everyone is kept in memory, saved to a JSON
// state file and pushed to connected viewers as server-sent events.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{Config, FanoutConfig};
pub use error::{ApiError, Error, Result};
pub use routes::build_router;
pub use services::{EventFanout, PersistenceManager, Tracker, UserRegistry};
pub use state::AppState;
