//! Core engine — the discovery → classify → persist scrape loop.

pub mod change;
pub mod coordinator;
pub mod risk;
pub mod scheduler;
pub mod warmup;

use std::sync::Arc;
use tokio::sync::watch;

use crate::broadcast::{Broadcaster, Topic};
use crate::cache::OddsCache;

// ---------------------------------------------------------------------------
// Cooperative shutdown
// ---------------------------------------------------------------------------

/// Cooperative cancellation signal shared across the pipeline. The
/// coordinator checks it between phases, batches and events; in-flight
/// fetches race against it.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        ShutdownSignal { tx: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation is signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        // The sender lives in self, so `changed` can only fail after
        // cancel was observed.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cache → broadcaster bridge
// ---------------------------------------------------------------------------

/// Wire the odds cache's update callbacks onto the `odds_updates`
/// topic, the shape the WebSocket collaborator consumes.
pub fn bridge_cache_updates(cache: &OddsCache, broadcaster: Arc<Broadcaster>) {
    cache.on_update(move |event_id, bookmaker| {
        broadcaster.publish(
            Topic::OddsUpdates,
            "odds_update",
            serde_json::json!({
                "event_ids": [event_id],
                "source": bookmaker.slug(),
            }),
        );
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
