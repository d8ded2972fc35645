//! Asynchronous write path.
//!
//! A bounded queue of [`WriteBatch`] items separates the coordinator
//! (producer) from the write handler (consumer). Enqueue never blocks:
//! under overload the oldest batches are dropped and counted, so a
//! slow writer can never stall scraping. The handler opens a fresh
//! transactional session per batch and retries transient store errors
//! with bounded backoff before dropping the batch.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::PipelineStore;
use crate::types::WriteBatch;

/// Retry schedule for a failing batch.
const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF_BASE_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

struct QueueInner {
    deque: Mutex<VecDeque<WriteBatch>>,
    notify: Notify,
    capacity: usize,
    overflow: AtomicU64,
    closed: AtomicBool,
}

/// Bounded drop-oldest batch queue. Cheap to clone; all clones share
/// the same queue.
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<QueueInner>,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        WriteQueue {
            inner: Arc::new(QueueInner {
                deque: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                overflow: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Non-blocking enqueue. Drops the oldest batch when full and
    /// counts the overflow; the producer never waits.
    pub fn enqueue(&self, batch: WriteBatch) {
        {
            let mut deque = self.inner.deque.lock();
            deque.push_back(batch);
            while deque.len() > self.inner.capacity {
                deque.pop_front();
                let dropped = self.inner.overflow.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = dropped, "Write queue overflow, oldest batch dropped");
            }
        }
        self.inner.notify.notify_one();
    }

    /// Await the next batch. Returns `None` once the queue is closed
    /// and drained.
    pub async fn recv(&self) -> Option<WriteBatch> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(batch) = self.inner.deque.lock().pop_front() {
                return Some(batch);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return self.inner.deque.lock().pop_front();
            }
            notified.await;
        }
    }

    /// Close the queue: the consumer drains what's left, then stops.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.deque.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total batches dropped to overflow since startup.
    pub fn overflow_count(&self) -> u64 {
        self.inner.overflow.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Single consumer draining the write queue into the store,
/// session-per-batch.
pub struct WriteHandler {
    store: Arc<dyn PipelineStore>,
    queue: WriteQueue,
}

impl WriteHandler {
    pub fn new(store: Arc<dyn PipelineStore>, queue: WriteQueue) -> Self {
        WriteHandler { store, queue }
    }

    /// Run until the queue closes and drains. One bad batch never
    /// poisons the next: the session is per-batch and failures are
    /// dropped after retries.
    pub async fn run(self) {
        info!("Write handler started");
        while let Some(batch) = self.queue.recv().await {
            self.handle(batch).await;
        }
        info!("Write handler drained and stopped");
    }

    async fn handle(&self, batch: WriteBatch) {
        let run_id = batch.run_id;
        let writes = batch.writes.len();
        let alerts = batch.alerts.len();

        for attempt in 0..WRITE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(WRITE_BACKOFF_BASE_MS << (attempt - 1)))
                    .await;
            }
            match self.store.write_batch(&batch).await {
                Ok(()) => {
                    debug!(%run_id, writes, alerts, attempt, "Write batch committed");
                    return;
                }
                Err(error) if attempt + 1 < WRITE_ATTEMPTS => {
                    warn!(%run_id, attempt, %error, "Write batch failed, retrying");
                }
                Err(error) => {
                    error!(%run_id, writes, alerts, %error, "Write batch dropped after retries");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn batch() -> WriteBatch {
        WriteBatch::new(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_enqueue_is_nonblocking_and_drops_oldest() {
        let queue = WriteQueue::new(4);
        let mut ids = Vec::new();
        for _ in 0..8 {
            let b = batch();
            ids.push(b.run_id);
            queue.enqueue(b);
        }

        // Capacity respected, overflow counted, oldest gone.
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.overflow_count(), 4);
    }

    #[tokio::test]
    async fn test_recv_fifo_of_survivors() {
        let queue = WriteQueue::new(2);
        let batches: Vec<WriteBatch> = (0..3).map(|_| batch()).collect();
        for b in &batches {
            queue.enqueue(b.clone());
        }
        // Oldest (index 0) was dropped.
        assert_eq!(queue.recv().await.unwrap().run_id, batches[1].run_id);
        assert_eq!(queue.recv().await.unwrap().run_id, batches[2].run_id);
    }

    #[tokio::test]
    async fn test_close_drains_then_none() {
        let queue = WriteQueue::new(8);
        queue.enqueue(batch());
        queue.close();
        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_enqueue() {
        let queue = WriteQueue::new(8);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = batch();
        let expected = b.run_id;
        queue.enqueue(b);
        let received = consumer.await.unwrap().unwrap();
        assert_eq!(received.run_id, expected);
    }

    #[tokio::test]
    async fn test_handler_commits_batches() {
        let store = Arc::new(MemoryStore::new());
        let queue = WriteQueue::new(8);
        let handler = WriteHandler::new(store.clone(), queue.clone());

        queue.enqueue(batch());
        queue.enqueue(batch());
        queue.close();
        handler.run().await;

        assert_eq!(store.batches.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_retries_then_drops_bad_batch() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes.store(true, Ordering::SeqCst);
        let queue = WriteQueue::new(8);
        let handler = WriteHandler::new(store.clone(), queue.clone());

        queue.enqueue(batch());
        queue.close();
        handler.run().await;

        // All attempts failed; the batch was dropped, not committed.
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), WRITE_ATTEMPTS as u64);
        assert!(store.batches.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_recovers_after_store_unfreezes() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes.store(true, Ordering::SeqCst);
        let queue = WriteQueue::new(2);

        // Simulated DB freeze: producer keeps enqueueing 2x capacity.
        for _ in 0..4 {
            queue.enqueue(batch());
        }
        assert_eq!(queue.overflow_count(), 2);

        // Store recovers; subsequent batches flow normally.
        store.fail_writes.store(false, Ordering::SeqCst);
        queue.close();
        WriteHandler::new(store.clone(), queue.clone()).run().await;
        assert_eq!(store.batches.lock().len(), 2);
    }
}
