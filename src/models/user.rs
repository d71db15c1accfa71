// src/models/user.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::track::{GeoPos, TrackHistory};

/// Semantic tag describing what a participant is doing.
///
/// The wire names share the `status_` prefix so viewers can filter on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovingState {
    #[default]
    #[serde(rename = "status_moving")]
    Moving,
    #[serde(rename = "status_pitstop")]
    PitStop,
    #[serde(rename = "status_puncture")]
    Puncture,
    #[serde(rename = "status_fall")]
    Fall,
    #[serde(rename = "status_incident")]
    Incident,
    #[serde(rename = "status_finished")]
    Finished,
    #[serde(rename = "status_dnf")]
    DidNotFinish,
}

impl MovingState {
    pub const ALL: [MovingState; 7] = [
        MovingState::Moving,
        MovingState::PitStop,
        MovingState::Puncture,
        MovingState::Fall,
        MovingState::Incident,
        MovingState::Finished,
        MovingState::DidNotFinish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovingState::Moving => "status_moving",
            MovingState::PitStop => "status_pitstop",
            MovingState::Puncture => "status_puncture",
            MovingState::Fall => "status_fall",
            MovingState::Incident => "status_incident",
            MovingState::Finished => "status_finished",
            MovingState::DidNotFinish => "status_dnf",
        }
    }
}

impl fmt::Display for MovingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMovingState(pub String);

impl fmt::Display for UnknownMovingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown moving state '{}'", self.0)
    }
}

impl std::error::Error for UnknownMovingState {}

impl FromStr for MovingState {
    type Err = UnknownMovingState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovingState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownMovingState(s.to_string()))
    }
}

/// Everything known about one participant.
///
/// `history` holds positions the user has moved away from; the current
/// position and the synthetic zero start position never appear in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "UserRecord", from = "UserRecord")]
pub struct UserState {
    pub id: String,
    pub status: String,
    pub moving_state: MovingState,
    pub pos: GeoPos,
    pub last: DateTime<Utc>,
    pub history: TrackHistory,
}

impl UserState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: String::new(),
            moving_state: MovingState::default(),
            pos: GeoPos::default(),
            last: DateTime::<Utc>::default(),
            history: TrackHistory::new(),
        }
    }

    /// Moves the user, archiving the previous position when it is a real,
    /// different one.
    pub fn update_position(&mut self, pos: GeoPos, last: DateTime<Utc>) {
        if pos != self.pos && !self.pos.is_zero() {
            self.history.push(self.pos);
        }
        self.pos = pos;
        self.last = last;
    }

    /// Each field is replaced only when a value is supplied.
    pub fn update_status(&mut self, status: Option<&str>, moving_state: Option<MovingState>) {
        if let Some(status) = status {
            self.status = status.to_string();
        }
        if let Some(moving_state) = moving_state {
            self.moving_state = moving_state;
        }
    }
}

/// Persisted and wire form of a [`UserState`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserRecord {
    user_name: String,
    #[serde(default)]
    status: String,
    #[serde(default, deserialize_with = "moving_state_or_default")]
    moving_state: MovingState,
    #[serde(default)]
    pos: GeoPos,
    #[serde(default)]
    last: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_empty"
    )]
    track: Vec<GeoPos>,
}

impl From<UserState> for UserRecord {
    fn from(user: UserState) -> Self {
        Self {
            track: user.history.to_ordered_sequence(),
            user_name: user.id,
            status: user.status,
            moving_state: user.moving_state,
            pos: user.pos,
            last: user.last,
        }
    }
}

impl From<UserRecord> for UserState {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.user_name,
            status: record.status,
            moving_state: record.moving_state,
            pos: record.pos,
            last: record.last,
            history: TrackHistory::from_ordered_sequence(record.track),
        }
    }
}

// Older state files carry an empty string for users that never set one.
fn moving_state_or_default<'de, D>(deserializer: D) -> Result<MovingState, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(MovingState::default()),
        Some(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<GeoPos>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<GeoPos>>::deserialize(deserializer)?.unwrap_or_default())
}
