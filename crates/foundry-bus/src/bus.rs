use crate::config::BusConfig;
use chrono::{DateTime, Utc};
use foundry_core::topics::{agent_topic, ALL_MESSAGES, COORDINATION};
use foundry_core::{FoundryError, FoundryResult, Message, RetryPolicy};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What happened to a point-to-point [`MessageBus::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered to this many live subscribers of the recipient's topic.
    Delivered(usize),
    /// No subscriber yet; held for up to the message TTL.
    Held,
}

/// Counters describing bus traffic since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Messages handed to `publish`, `send` or `broadcast`.
    pub published: u64,
    /// Individual subscriber deliveries.
    pub delivered: u64,
    /// Messages parked for an absent recipient.
    pub held: u64,
    /// Held messages dropped because their TTL ran out or the bound was hit.
    pub dropped: u64,
    /// Sends rejected with `RecipientUnavailable`.
    pub unavailable: u64,
}

struct Slot {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct HeldMessage {
    message: Message,
    held_at: DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    held: AtomicU64,
    dropped: AtomicU64,
    unavailable: AtomicU64,
}

struct BusInner {
    config: BusConfig,
    // Lock order: `topics` before `held`.
    topics: RwLock<HashMap<String, Vec<Slot>>>,
    held: Mutex<HashMap<String, VecDeque<HeldMessage>>>,
    next_slot: AtomicU64,
    counters: Counters,
}

/// In-process topic-based message bus.
///
/// Cloning is cheap and every clone shares the same topics. Delivery is
/// at-least-once per subscriber and ordered per sender and recipient, since
/// each subscriber owns one FIFO channel fed synchronously by `publish`.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Creates a bus with default configuration.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Creates a bus with the given configuration.
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                topics: RwLock::new(HashMap::new()),
                held: Mutex::new(HashMap::new()),
                next_slot: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// The configuration this bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Subscribes to `topic`. Messages held for the topic that have not
    /// expired are delivered to the new subscriber first.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_slot.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.inner.topics.write();
        {
            let mut held = self.inner.held.lock();
            if let Some(queue) = held.remove(&topic) {
                let now = Utc::now();
                for parked in queue {
                    if parked.message.is_expired_at(parked.held_at, now) {
                        self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    if tx.send(parked.message).is_ok() {
                        self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        topics.entry(topic.clone()).or_default().push(Slot { id, tx });
        debug!(topic = %topic, slot = id, "Subscribed");

        Subscription {
            topic,
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publishes `message` to every live subscriber of `topic` and returns how
    /// many received it.
    pub fn publish(&self, topic: &str, message: Message) -> usize {
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        self.mirror(topic, &message);
        let topics = self.inner.topics.read();
        self.deliver(&topics, topic, message)
    }

    /// Point-to-point delivery to `message.recipient`.
    ///
    /// Fails with [`FoundryError::RecipientUnavailable`] when nobody listens
    /// on the recipient's endpoint and the message has no TTL. With a TTL the
    /// message is held for the next subscriber.
    pub fn send(&self, message: Message) -> FoundryResult<Delivery> {
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        let topic = agent_topic(&message.recipient);
        self.mirror(&topic, &message);

        let topics = self.inner.topics.read();
        if has_live(&topics, &topic) {
            let delivered = self.deliver(&topics, &topic, message);
            if delivered > 0 {
                return Ok(Delivery::Delivered(delivered));
            }
            // Every receiver closed between the check and delivery; the
            // message was consumed, so report it as unavailable.
            self.inner.counters.unavailable.fetch_add(1, Ordering::Relaxed);
            return Err(FoundryError::RecipientUnavailable(topic));
        }

        if message.ttl == 0 {
            self.inner.counters.unavailable.fetch_add(1, Ordering::Relaxed);
            return Err(FoundryError::RecipientUnavailable(topic));
        }

        self.hold(topic, message);
        Ok(Delivery::Held)
    }

    /// Sends to every subscriber of the coordination topic.
    pub fn broadcast(&self, message: Message) -> usize {
        self.publish(COORDINATION, message)
    }

    /// [`MessageBus::send`], retrying `RecipientUnavailable` with exponential
    /// backoff.
    ///
    /// Each retry is the message's own [`Message::redelivery`], so the number
    /// of attempts never exceeds `message.max_retries + 1`. The policy can only
    /// shorten that bound.
    pub async fn send_with_retry(
        &self,
        message: Message,
        policy: &RetryPolicy,
    ) -> FoundryResult<Delivery> {
        let mut current = message;
        let mut attempt: u32 = 0;
        loop {
            match self.send(current.clone()) {
                Ok(delivery) => return Ok(delivery),
                Err(FoundryError::RecipientUnavailable(topic)) => {
                    let next = if attempt < policy.max_retries {
                        current.redelivery()
                    } else {
                        None
                    };
                    let Some(next) = next else {
                        warn!(
                            message_id = %current.id,
                            topic = %topic,
                            attempts = attempt + 1,
                            "Recipient unavailable, giving up"
                        );
                        return Err(FoundryError::RecipientUnavailable(topic));
                    };
                    let delay = policy.delay_for(attempt);
                    debug!(
                        message_id = %current.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Recipient unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    current = next;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map_or(0, |slots| slots.iter().filter(|s| !s.tx.is_closed()).count())
    }

    /// Whether `endpoint_id` has a live subscriber on its point-to-point topic.
    pub fn is_reachable(&self, endpoint_id: &str) -> bool {
        self.subscriber_count(&agent_topic(endpoint_id)) > 0
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .topics
            .read()
            .iter()
            .filter(|(_, slots)| !slots.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of messages currently held for absent recipients, after
    /// discarding expired ones.
    pub fn held_count(&self) -> usize {
        let now = Utc::now();
        let mut held = self.inner.held.lock();
        let mut dropped = 0u64;
        for queue in held.values_mut() {
            let before = queue.len();
            queue.retain(|h| !h.message.is_expired_at(h.held_at, now));
            dropped += (before - queue.len()) as u64;
        }
        held.retain(|_, queue| !queue.is_empty());
        self.inner.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        held.values().map(VecDeque::len).sum()
    }

    /// Snapshot of traffic counters.
    pub fn stats(&self) -> BusStats {
        let c = &self.inner.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            held: c.held.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            unavailable: c.unavailable.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self, topics: &HashMap<String, Vec<Slot>>, topic: &str, message: Message) -> usize {
        let Some(slots) = topics.get(topic) else {
            return 0;
        };
        let mut delivered = 0;
        for slot in slots {
            if slot.tx.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        self.inner
            .counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    fn mirror(&self, topic: &str, message: &Message) {
        if !self.inner.config.monitor || topic == ALL_MESSAGES {
            return;
        }
        let topics = self.inner.topics.read();
        self.deliver(&topics, ALL_MESSAGES, message.clone());
    }

    fn hold(&self, topic: String, message: Message) {
        let now = Utc::now();
        let mut held = self.inner.held.lock();
        let queue = held.entry(topic.clone()).or_default();
        let before = queue.len();
        queue.retain(|h| !h.message.is_expired_at(h.held_at, now));
        let mut dropped = (before - queue.len()) as u64;
        queue.push_back(HeldMessage {
            message,
            held_at: now,
        });
        while queue.len() > self.inner.config.max_held_per_recipient {
            queue.pop_front();
            dropped += 1;
        }
        self.inner.counters.held.fetch_add(1, Ordering::Relaxed);
        self.inner.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        debug!(topic = %topic, queued = queue.len(), "Holding message for absent recipient");
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

fn has_live(topics: &HashMap<String, Vec<Slot>>, topic: &str) -> bool {
    topics
        .get(topic)
        .is_some_and(|slots| slots.iter().any(|s| !s.tx.is_closed()))
}

/// A live subscription to one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next message. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut topics = inner.topics.write();
        if let Some(slots) = topics.get_mut(&self.topic) {
            slots.retain(|s| s.id != self.id);
            if slots.is_empty() {
                topics.remove(&self.topic);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use foundry_core::MessageKind;
    use serde_json::json;

    fn msg(to: &str) -> Message {
        Message::new(MessageKind::Status, "tester", to, json!({}))
    }

    #[test]
    fn test_publish_counts_live_subscribers() {
        let bus = MessageBus::new();
        let _a = bus.subscribe("t");
        let _b = bus.subscribe("t");
        assert_eq!(bus.publish("t", msg("t")), 2);
        assert_eq!(bus.publish("other", msg("other")), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = MessageBus::new();
        let sub = bus.subscribe("t");
        assert_eq!(bus.subscriber_count("t"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("t"), 0);
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn test_send_without_recipient_fails_fast() {
        let bus = MessageBus::new();
        let err = bus.send(msg("ghost")).unwrap_err();
        assert!(matches!(err, FoundryError::RecipientUnavailable(_)));
        assert_eq!(bus.stats().unavailable, 1);
    }

    #[test]
    fn test_send_with_ttl_is_held_until_subscribe() {
        let bus = MessageBus::new();
        let m = msg("late").with_ttl(60);
        let id = m.id;
        assert_eq!(bus.send(m).unwrap(), Delivery::Held);
        assert_eq!(bus.held_count(), 1);

        let mut sub = bus.subscribe(agent_topic("late"));
        let got = sub.try_recv().unwrap();
        assert_eq!(got.id, id);
        assert_eq!(bus.held_count(), 0);
    }

    #[test]
    fn test_held_bound_drops_oldest() {
        let bus = MessageBus::with_config(BusConfig {
            max_held_per_recipient: 2,
            ..BusConfig::default()
        });
        let first = msg("late").with_ttl(60);
        let first_id = first.id;
        bus.send(first).unwrap();
        bus.send(msg("late").with_ttl(60)).unwrap();
        bus.send(msg("late").with_ttl(60)).unwrap();
        assert_eq!(bus.held_count(), 2);

        let mut sub = bus.subscribe(agent_topic("late"));
        let got = sub.try_recv().unwrap();
        assert_ne!(got.id, first_id);
    }

    #[test]
    fn test_monitor_topic_sees_everything() {
        let bus = MessageBus::new();
        let mut monitor = bus.subscribe(ALL_MESSAGES);
        let _agent = bus.subscribe(agent_topic("a"));
        bus.send(msg("a")).unwrap();
        bus.publish("x", msg("x"));
        let _ = bus.send(msg("nobody"));
        let mut seen = 0;
        while monitor.try_recv().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_per_sender_order_is_preserved() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe(agent_topic("r"));
        let ids: Vec<_> = (0..20)
            .map(|_| {
                let m = msg("r");
                let id = m.id;
                bus.send(m).unwrap();
                id
            })
            .collect();
        let got: Vec<_> = std::iter::from_fn(|| sub.try_recv()).map(|m| m.id).collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn test_send_with_retry_respects_max_retries() {
        let bus = MessageBus::new();
        let mut monitor = bus.subscribe(ALL_MESSAGES);
        let policy = RetryPolicy::new(10, 1);
        let m = msg("ghost").with_max_retries(2);
        let err = bus.send_with_retry(m, &policy).await.unwrap_err();
        assert!(matches!(err, FoundryError::RecipientUnavailable(_)));

        let attempts: Vec<u32> = std::iter::from_fn(|| monitor.try_recv())
            .map(|m| m.retry_count)
            .collect();
        assert_eq!(attempts, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_send_with_retry_succeeds_once_recipient_appears() {
        let bus = MessageBus::new();
        let bus2 = bus.clone();
        let waiter = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(15)).await;
            let mut sub = bus2.subscribe(agent_topic("slow"));
            sub.recv().await
        });
        let policy = RetryPolicy::new(8, 10);
        let delivery = bus
            .send_with_retry(msg("slow").with_max_retries(8), &policy)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Delivered(1));
        let received = waiter.await.unwrap().unwrap();
        assert!(received.retry_count >= 1);
    }
}
