// src/models/track.rs
use serde::{Deserialize, Serialize};

/// How many past positions are kept per user.
pub const TRACK_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeoPos {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lon, lat }
    }

    /// The synthetic position every user starts with.
    pub fn is_zero(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// Fixed-capacity ring of past positions.
///
/// Writes go to the slot under the cursor and advance it, so once the ring
/// is full the cursor always points at the oldest surviving entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackHistory {
    slots: Box<[Option<GeoPos>]>,
    cursor: usize,
}

impl TrackHistory {
    pub fn new() -> Self {
        Self::with_capacity(TRACK_DEPTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "track capacity must be non-zero");
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Overwrites the slot under the cursor; the oldest entry is lost once full.
    pub fn push(&mut self, pos: GeoPos) {
        self.slots[self.cursor] = Some(pos);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Oldest-to-newest walk starting at the cursor, skipping slots that
    /// were never written.
    pub fn to_ordered_sequence(&self) -> Vec<GeoPos> {
        let capacity = self.slots.len();
        (0..capacity)
            .filter_map(|offset| self.slots[(self.cursor + offset) % capacity])
            .collect()
    }

    /// Rebuilds a ring by replaying `positions` in order. Only the newest
    /// `TRACK_DEPTH` entries survive if there are more.
    pub fn from_ordered_sequence<I>(positions: I) -> Self
    where
        I: IntoIterator<Item = GeoPos>,
    {
        let mut track = Self::new();
        for pos in positions {
            track.push(pos);
        }
        track
    }
}

impl Default for TrackHistory {
    fn default() -> Self {
        Self::new()
    }
}
