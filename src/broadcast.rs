//! Topic-keyed in-memory pub/sub.
//!
//! Producers publish typed envelopes; each subscriber owns a bounded
//! queue. Delivery is FIFO per subscriber and never backpressures a
//! producer: a subscriber whose queue is full is dropped (its channel
//! closes), exactly like one that went away. The WebSocket collaborator
//! bridges these topics to outgoing frames.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::ProgressEvent;

// ---------------------------------------------------------------------------
// Topics and envelopes
// ---------------------------------------------------------------------------

/// The topics the pipeline publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ScrapeProgress,
    OddsUpdates,
    RiskAlerts,
}

impl Topic {
    pub const ALL: &'static [Topic] = &[Topic::ScrapeProgress, Topic::OddsUpdates, Topic::RiskAlerts];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ScrapeProgress => "scrape_progress",
            Topic::OddsUpdates => "odds_updates",
            Topic::RiskAlerts => "risk_alerts",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The wire shape of every broadcast message.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// UTC ISO-8601 with a `Z` suffix.
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl Envelope {
    fn new(kind: &str, data: serde_json::Value) -> Self {
        Envelope {
            kind: kind.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Envelope>,
}

/// In-process pub/sub bus with per-subscriber bounded queues.
pub struct Broadcaster {
    capacity: usize,
    next_id: AtomicU64,
    topics: Mutex<HashMap<Topic, Vec<Subscriber>>>,
}

impl Broadcaster {
    /// `capacity` bounds each subscriber's queue.
    pub fn new(capacity: usize) -> Self {
        Broadcaster {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to one topic. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, topic: Topic) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(topic)
            .or_default()
            .push(Subscriber { id, tx });
        debug!(topic = %topic, subscriber = id, "Broadcast subscriber added");
        rx
    }

    /// Publish an envelope on a topic. Returns the number of
    /// subscribers it was delivered to. Subscribers that are gone or
    /// whose queue is full are dropped — a producer never waits.
    pub fn publish(&self, topic: Topic, kind: &str, data: serde_json::Value) -> usize {
        let envelope = Envelope::new(kind, data);
        let mut topics = self.topics.lock();
        let Some(subscribers) = topics.get_mut(&topic) else {
            return 0;
        };

        let mut delivered = 0usize;
        subscribers.retain(|sub| match sub.tx.try_send(envelope.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic = %topic, subscriber = sub.id, "Slow broadcast subscriber dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Publish a coordinator phase event on `scrape_progress`.
    pub fn publish_progress(&self, event: &ProgressEvent) -> usize {
        let data = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        self.publish(Topic::ScrapeProgress, event.kind(), data)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.lock().get(&topic).map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_delivers_fifo() {
        let bus = Broadcaster::new(8);
        let mut rx = bus.subscribe(Topic::ScrapeProgress);

        for i in 0..3 {
            let delivered = bus.publish(Topic::ScrapeProgress, "CYCLE_START", json!({ "seq": i }));
            assert_eq!(delivered, 1);
        }

        for expected in 0..3 {
            let envelope = rx.recv().await.unwrap();
            assert_eq!(envelope.kind, "CYCLE_START");
            assert_eq!(envelope.data["seq"], expected);
        }
    }

    #[tokio::test]
    async fn test_envelope_timestamp_has_z_suffix() {
        let bus = Broadcaster::new(4);
        let mut rx = bus.subscribe(Topic::OddsUpdates);
        bus.publish(Topic::OddsUpdates, "odds_update", json!({}));
        let envelope = rx.recv().await.unwrap();
        assert!(envelope.timestamp.ends_with('Z'), "{}", envelope.timestamp);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = Broadcaster::new(4);
        assert_eq!(bus.publish(Topic::RiskAlerts, "risk_alerts", json!({})), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = Broadcaster::new(4);
        let mut progress_rx = bus.subscribe(Topic::ScrapeProgress);
        let mut odds_rx = bus.subscribe(Topic::OddsUpdates);

        bus.publish(Topic::OddsUpdates, "odds_update", json!({ "event_ids": [1] }));

        let envelope = odds_rx.recv().await.unwrap();
        assert_eq!(envelope.kind, "odds_update");
        // Nothing on the progress topic.
        assert!(progress_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped_not_blocking() {
        let bus = Broadcaster::new(2);
        let mut slow_rx = bus.subscribe(Topic::ScrapeProgress);
        let mut healthy_rx = bus.subscribe(Topic::ScrapeProgress);

        // Fill the slow subscriber's queue without draining it.
        bus.publish(Topic::ScrapeProgress, "BATCH_START", json!({ "n": 1 }));
        bus.publish(Topic::ScrapeProgress, "BATCH_START", json!({ "n": 2 }));
        // Third publish overflows the slow queue → it gets dropped.
        let delivered = bus.publish(Topic::ScrapeProgress, "BATCH_START", json!({ "n": 3 }));
        assert_eq!(delivered, 1);
        assert_eq!(bus.subscriber_count(Topic::ScrapeProgress), 1);

        // Healthy subscriber drains while the slow one is drained then closed.
        for n in 1..=3 {
            assert_eq!(healthy_rx.recv().await.unwrap().data["n"], n);
        }
        assert_eq!(slow_rx.recv().await.unwrap().data["n"], 1);
        assert_eq!(slow_rx.recv().await.unwrap().data["n"], 2);
        assert!(slow_rx.recv().await.is_none(), "slow subscriber channel should be closed");
    }

    #[tokio::test]
    async fn test_dropped_receiver_removed_on_next_publish() {
        let bus = Broadcaster::new(4);
        let rx = bus.subscribe(Topic::RiskAlerts);
        drop(rx);
        assert_eq!(bus.subscriber_count(Topic::RiskAlerts), 1);
        assert_eq!(bus.publish(Topic::RiskAlerts, "risk_alerts", json!({})), 0);
        assert_eq!(bus.subscriber_count(Topic::RiskAlerts), 0);
    }

    #[tokio::test]
    async fn test_publish_progress_wraps_event() {
        let bus = Broadcaster::new(4);
        let mut rx = bus.subscribe(Topic::ScrapeProgress);
        let run_id = uuid::Uuid::new_v4();
        bus.publish_progress(&ProgressEvent::CycleStart { run_id });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.kind, "CYCLE_START");
        assert_eq!(envelope.data["run_id"], run_id.to_string());
    }
}
