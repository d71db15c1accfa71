// src/models/mod.rs
pub mod track;
pub mod update;
pub mod user;

pub use track::{GeoPos, TrackHistory, TRACK_DEPTH};
pub use update::{KeepalivePing, PositionUpdate, StatusUpdate};
pub use user::{MovingState, UserState};
