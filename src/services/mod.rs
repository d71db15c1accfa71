// src/services/mod.rs
pub mod fanout;
pub mod ingest;
pub mod persistence;
pub mod registry;

pub use fanout::{Delivery, EventFanout, SubscriberFeed, Subscription, SubscriptionId};
pub use ingest::Tracker;
pub use persistence::{PersistenceManager, StateSaver};
pub use registry::UserRegistry;
