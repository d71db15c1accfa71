// src/services/fanout.rs
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::FanoutConfig;
use crate::models::UserState;

pub type SubscriptionId = u64;

struct SubscriberQueue {
    peer: String,
    pending: Mutex<VecDeque<UserState>>,
    notify: Notify,
}

impl SubscriberQueue {
    fn pending(&self) -> MutexGuard<'_, VecDeque<UserState>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out of accepted updates to live viewers.
///
/// Every viewer connection owns a [`Subscription`] with its own pending
/// queue. `broadcast` appends the snapshot to every queue registered at that
/// moment and wakes the owner; nothing is coalesced or replayed.
#[derive(Default)]
pub struct EventFanout {
    subscribers: DashMap<SubscriptionId, Arc<SubscriberQueue>>,
    next_id: AtomicU64,
}

impl EventFanout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds an empty-queue subscription. It is removed again when the
    /// returned handle is dropped.
    pub fn register(self: &Arc<Self>, peer: impl Into<String>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            peer: peer.into(),
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        self.subscribers.insert(id, queue.clone());
        info!(subscription = id, peer = %queue.peer, viewers = self.subscribers.len(), "viewer subscribed");

        Subscription {
            id,
            queue,
            fanout: Arc::clone(self),
        }
    }

    /// Returns whether the subscription was still registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, queue)) => {
                info!(subscription = id, peer = %queue.peer, viewers = self.subscribers.len(), "viewer unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Queues `snapshot` for every current subscription and returns how many
    /// received it.
    pub fn broadcast(&self, snapshot: &UserState) -> usize {
        let mut delivered = 0;
        for entry in self.subscribers.iter() {
            let queue = entry.value();
            queue.pending().push_back(snapshot.clone());
            queue.notify.notify_one();
            delivered += 1;
        }
        debug!(user = %snapshot.id, viewers = delivered, "broadcast");
        delivered
    }

    pub fn count(&self) -> usize {
        self.subscribers.len()
    }
}

/// One viewer's live channel. Dropping it unregisters it.
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<SubscriberQueue>,
    fanout: Arc<EventFanout>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.queue.peer
    }

    pub fn pending(&self) -> usize {
        self.queue.pending().len()
    }

    /// Takes everything queued so far, in broadcast order.
    pub fn drain(&self) -> Vec<UserState> {
        self.queue.pending().drain(..).collect()
    }

    async fn notified(&self) {
        self.queue.notify.notified().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.fanout.unregister(self.id);
    }
}

#[derive(Debug)]
pub enum Delivery {
    Batch(Vec<UserState>),
    Keepalive,
}

/// Delivery loop state for one subscription.
pub struct SubscriberFeed {
    subscription: Subscription,
    ticker: Interval,
    idle_ticks: u32,
    keepalive_ticks: u32,
}

impl SubscriberFeed {
    pub fn new(subscription: Subscription, config: FanoutConfig) -> Self {
        let mut ticker = interval_at(Instant::now() + config.tick, config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            subscription,
            ticker,
            idle_ticks: 0,
            keepalive_ticks: config.keepalive_ticks.max(1),
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Waits for the next thing to push: the whole pending queue as soon as
    /// anything is broadcast, or a keepalive after enough idle ticks.
    pub async fn next_delivery(&mut self) -> Delivery {
        loop {
            let batch = self.subscription.drain();
            if !batch.is_empty() {
                self.idle_ticks = 0;
                return Delivery::Batch(batch);
            }

            tokio::select! {
                _ = self.subscription.notified() => {}
                _ = self.ticker.tick() => {
                    self.idle_ticks += 1;
                    if self.idle_ticks >= self.keepalive_ticks {
                        self.idle_ticks = 0;
                        return Delivery::Keepalive;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn user(id: &str, status: &str) -> UserState {
        let mut user = UserState::new(id);
        user.status = status.to_string();
        user
    }

    fn statuses(batch: &[UserState]) -> Vec<&str> {
        batch.iter().map(|u| u.status.as_str()).collect()
    }

    #[test]
    fn test_broadcast_reaches_every_subscription() {
        let fanout = EventFanout::new();
        let a = fanout.register("10.0.0.1:1000");
        let b = fanout.register("10.0.0.2:1000");

        assert_eq!(fanout.broadcast(&user("alice", "one")), 2);

        assert_eq!(statuses(&a.drain()), vec!["one"]);
        assert_eq!(statuses(&b.drain()), vec!["one"]);
        assert!(a.drain().is_empty());
    }

    #[test]
    fn test_repeated_updates_are_not_coalesced() {
        let fanout = EventFanout::new();
        let sub = fanout.register("peer");

        fanout.broadcast(&user("alice", "one"));
        fanout.broadcast(&user("alice", "two"));
        fanout.broadcast(&user("bob", "three"));

        assert_eq!(sub.pending(), 3);
        assert_eq!(statuses(&sub.drain()), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_late_subscription_gets_no_replay() {
        let fanout = EventFanout::new();
        fanout.broadcast(&user("alice", "before"));

        let sub = fanout.register("peer");
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_drop_unregisters() {
        let fanout = EventFanout::new();
        let sub = fanout.register("peer");
        let id = sub.id();
        assert_eq!(fanout.count(), 1);

        drop(sub);
        assert_eq!(fanout.count(), 0);
        assert!(!fanout.unregister(id));
        assert_eq!(fanout.broadcast(&user("alice", "nobody listening")), 0);
    }

    #[test]
    fn test_explicit_unregister_then_drop_is_harmless() {
        let fanout = EventFanout::new();
        let sub = fanout.register("peer");

        assert!(fanout.unregister(sub.id()));
        drop(sub);
        assert_eq!(fanout.count(), 0);
    }

    #[test]
    fn test_disconnect_before_drain_does_not_affect_others() {
        let fanout = EventFanout::new();
        let first = fanout.register("first");
        let second = fanout.register("second");

        fanout.broadcast(&user("alice", "moved"));
        drop(first);

        assert_eq!(statuses(&second.drain()), vec!["moved"]);
        assert_eq!(fanout.count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_exactly_once_under_churn() {
        let fanout = EventFanout::new();
        let steady: Vec<_> = (0..8).map(|i| fanout.register(format!("steady-{i}"))).collect();

        let churn: Vec<_> = (0..4)
            .map(|i| {
                let fanout = fanout.clone();
                tokio::spawn(async move {
                    for j in 0..200 {
                        let sub = fanout.register(format!("churn-{i}-{j}"));
                        tokio::task::yield_now().await;
                        drop(sub);
                    }
                })
            })
            .collect();

        let total = 500;
        let broadcaster = {
            let fanout = fanout.clone();
            tokio::spawn(async move {
                for n in 0..total {
                    fanout.broadcast(&user("rider", &n.to_string()));
                    tokio::task::yield_now().await;
                }
            })
        };

        for handle in churn {
            handle.await.unwrap();
        }
        broadcaster.await.unwrap();

        let expected: Vec<String> = (0..total).map(|n| n.to_string()).collect();
        for sub in &steady {
            let got: Vec<String> = sub.drain().into_iter().map(|u| u.status).collect();
            assert_eq!(got, expected);
        }
        assert_eq!(fanout.count(), steady.len());
    }

    #[tokio::test]
    async fn test_feed_wakes_on_broadcast() {
        let fanout = EventFanout::new();
        let config = FanoutConfig {
            tick: Duration::from_secs(5),
            keepalive_ticks: 30,
        };
        let mut feed = SubscriberFeed::new(fanout.register("peer"), config);

        let sender = fanout.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.broadcast(&user("alice", "one"));
            sender.broadcast(&user("alice", "two"));
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), feed.next_delivery())
            .await
            .expect("broadcast should wake the feed before the first tick");
        let first = match delivery {
            Delivery::Batch(batch) => batch,
            other => panic!("expected a batch, got {other:?}"),
        };

        let mut seen = statuses(&first).into_iter().map(String::from).collect::<Vec<_>>();
        if seen.len() == 1 {
            if let Delivery::Batch(rest) = feed.next_delivery().await {
                seen.extend(rest.into_iter().map(|u| u.status));
            }
        }
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_feed_sends_keepalive_when_idle() {
        let fanout = EventFanout::new();
        let config = FanoutConfig {
            tick: Duration::from_millis(10),
            keepalive_ticks: 3,
        };
        let mut feed = SubscriberFeed::new(fanout.register("peer"), config);

        let delivery = tokio::time::timeout(Duration::from_secs(2), feed.next_delivery())
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::Keepalive));
    }

    #[tokio::test]
    async fn test_dropping_feed_unregisters() {
        let fanout = EventFanout::new();
        let feed = SubscriberFeed::new(fanout.register("peer"), FanoutConfig::default());
        assert_eq!(feed.subscription().peer(), "peer");
        assert_eq!(fanout.count(), 1);

        drop(feed);
        assert_eq!(fanout.count(), 0);
    }
}
