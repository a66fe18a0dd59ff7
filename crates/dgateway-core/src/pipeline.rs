//! Persistence pipeline
//!
//! Many proxy tasks hand finished exchanges to a single writer task through a
//! bounded queue. Producers never wait: when the queue is full the record is
//! dropped, counted and logged. The writer drains in arrival order and keeps
//! going when an individual insert fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::exchange::ExchangeRecord;

/// Destination for records leaving the queue
///
/// The storage engine implements this; tests plug in slow or failing writers.
#[async_trait]
pub trait ExchangeWriter: Send + Sync {
    /// Persist one record, returning its assigned id
    async fn write(&self, record: ExchangeRecord) -> Result<i64>;
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue was full; the record is gone
    Dropped,
    /// Writer has shut down; the record is gone
    Closed,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the pipeline counters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineStats {
    pub capacity: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub failed: u64,
}

/// Producer side. Cheap to clone; one clone per proxy task.
#[derive(Debug, Clone)]
pub struct CaptureQueue {
    tx: mpsc::Sender<ExchangeRecord>,
    counters: Arc<PipelineCounters>,
    capacity: usize,
}

/// Consumer side. Exactly one exists per queue.
#[derive(Debug)]
pub struct CaptureConsumer {
    rx: mpsc::Receiver<ExchangeRecord>,
    counters: Arc<PipelineCounters>,
}

/// Create a queue holding at most `capacity` pending records
pub fn capture_channel(capacity: usize) -> (CaptureQueue, CaptureConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(PipelineCounters::default());
    (
        CaptureQueue {
            tx,
            counters: counters.clone(),
            capacity,
        },
        CaptureConsumer { rx, counters },
    )
}

/// A reserved place in the queue
///
/// Holding a slot counts against the queue capacity, so a producer can
/// reserve before doing expensive work and skip that work when the queue is
/// full. Dropping an unused slot releases it.
#[derive(Debug)]
pub struct CaptureSlot {
    permit: mpsc::OwnedPermit<ExchangeRecord>,
    counters: Arc<PipelineCounters>,
}

impl CaptureSlot {
    pub fn fill(self, record: ExchangeRecord) {
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.permit.send(record);
    }
}

impl CaptureQueue {
    /// Reserve a slot without waiting. A full or closed queue counts as a
    /// dropped record.
    pub fn try_reserve(&self) -> std::result::Result<CaptureSlot, EnqueueOutcome> {
        match self.tx.clone().try_reserve_owned() {
            Ok(permit) => Ok(CaptureSlot {
                permit,
                counters: self.counters.clone(),
            }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Capture queue full ({} pending), dropping exchange (dropped so far: {})",
                    self.capacity, dropped
                );
                Err(EnqueueOutcome::Dropped)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Capture writer stopped, dropping exchange");
                Err(EnqueueOutcome::Closed)
            }
        }
    }

    /// Hand a record to the writer without waiting
    pub fn try_enqueue(&self, record: ExchangeRecord) -> EnqueueOutcome {
        match self.try_reserve() {
            Ok(slot) => {
                slot.fill(record);
                EnqueueOutcome::Queued
            }
            Err(outcome) => outcome,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        snapshot(&self.counters, self.capacity)
    }
}

impl CaptureConsumer {
    /// Wait for the next record; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<ExchangeRecord> {
        self.rx.recv().await
    }

    /// Drain the queue into `writer` until all producers are dropped or a
    /// shutdown signal arrives. On shutdown, records already queued are
    /// still written.
    pub async fn run<W: ExchangeWriter>(mut self, writer: W, mut shutdown: broadcast::Receiver<()>) {
        info!("Capture writer started");
        loop {
            tokio::select! {
                next = self.rx.recv() => match next {
                    Some(record) => self.persist(&writer, record).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    self.rx.close();
                    while let Some(record) = self.rx.recv().await {
                        self.persist(&writer, record).await;
                    }
                    break;
                }
            }
        }
        info!(
            "Capture writer stopped ({} persisted, {} failed)",
            self.counters.persisted.load(Ordering::Relaxed),
            self.counters.failed.load(Ordering::Relaxed)
        );
    }

    async fn persist<W: ExchangeWriter>(&self, writer: &W, record: ExchangeRecord) {
        let method = record.method.clone();
        let url = record.url.clone();
        match writer.write(record).await {
            Ok(id) => {
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                debug!("Stored exchange {} ({} {})", id, method, url);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Failed to store exchange {} {}: {}", method, url, e);
            }
        }
    }
}

fn snapshot(counters: &PipelineCounters, capacity: usize) -> PipelineStats {
    PipelineStats {
        capacity,
        enqueued: counters.enqueued.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
        persisted: counters.persisted.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::headers::HeaderMultimap;
    use chrono::Utc;
    use tokio::sync::Mutex;

    fn record(n: usize) -> ExchangeRecord {
        ExchangeRecord {
            timestamp: Utc::now(),
            method: "GET".to_string(),
            url: format!("/item/{n}"),
            request_headers: HeaderMultimap::new(),
            request_body: Vec::new(),
            status_code: 200,
            response_headers: HeaderMultimap::new(),
            response_body: Vec::new(),
        }
    }

    #[derive(Clone, Default)]
    struct MemoryWriter {
        stored: Arc<Mutex<Vec<ExchangeRecord>>>,
        fail_url: Option<String>,
    }

    #[async_trait]
    impl ExchangeWriter for MemoryWriter {
        async fn write(&self, record: ExchangeRecord) -> Result<i64> {
            if self.fail_url.as_deref() == Some(record.url.as_str()) {
                return Err(AppError::StorageError("disk full".to_string()));
            }
            let mut stored = self.stored.lock().await;
            stored.push(record);
            Ok(stored.len() as i64)
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_and_counts() {
        let (queue, consumer) = capture_channel(3);

        // Consumer not running yet: the queue fills up and the rest is dropped
        let outcomes: Vec<_> = (0..10).map(|n| queue.try_enqueue(record(n))).collect();
        assert_eq!(
            outcomes.iter().filter(|o| **o == EnqueueOutcome::Queued).count(),
            3
        );
        assert_eq!(
            outcomes.iter().filter(|o| **o == EnqueueOutcome::Dropped).count(),
            7
        );

        let stats = queue.stats();
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dropped, 7);

        let writer = MemoryWriter::default();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();
        consumer.run(writer.clone(), shutdown_rx).await;

        let stored = writer.stored.lock().await;
        let urls: Vec<_> = stored.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["/item/0", "/item/1", "/item/2"]);
        assert_eq!(queue.stats().persisted, 3);
        assert_eq!(queue.stats().dropped, 7);
    }

    #[tokio::test]
    async fn test_failed_insert_does_not_stop_writer() {
        let (queue, consumer) = capture_channel(10);
        for n in 0..3 {
            assert_eq!(queue.try_enqueue(record(n)), EnqueueOutcome::Queued);
        }
        let stats_handle = queue.clone();
        drop(queue);

        let writer = MemoryWriter {
            fail_url: Some("/item/1".to_string()),
            ..Default::default()
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();
        consumer.run(writer.clone(), shutdown_rx).await;

        assert_eq!(writer.stored.lock().await.len(), 2);
        let stats = stats_handle.stats();
        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_records() {
        let (queue, consumer) = capture_channel(10);
        queue.try_enqueue(record(0));
        queue.try_enqueue(record(1));

        let writer = MemoryWriter::default();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();

        // Producers are still alive; the shutdown signal alone ends the loop
        consumer.run(writer.clone(), shutdown_rx).await;
        assert_eq!(writer.stored.lock().await.len(), 2);

        assert_eq!(queue.try_enqueue(record(2)), EnqueueOutcome::Closed);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_reserved_slots_hold_capacity() {
        let (queue, mut consumer) = capture_channel(2);
        let first = queue.try_reserve().unwrap();
        let second = queue.try_reserve().unwrap();
        assert_eq!(queue.try_reserve().unwrap_err(), EnqueueOutcome::Dropped);
        assert_eq!(queue.stats().dropped, 1);
        assert_eq!(queue.stats().enqueued, 0);

        // An unused slot goes back to the queue
        drop(second);
        let third = queue.try_reserve().unwrap();

        first.fill(record(0));
        third.fill(record(1));
        assert_eq!(queue.stats().enqueued, 2);
        assert_eq!(consumer.recv().await.unwrap().url, "/item/0");
        assert_eq!(consumer.recv().await.unwrap().url, "/item/1");
    }

    #[tokio::test]
    async fn test_recv_preserves_order() {
        let (queue, mut consumer) = capture_channel(4);
        for n in 0..4 {
            queue.try_enqueue(record(n));
        }
        for n in 0..4 {
            assert_eq!(consumer.recv().await.unwrap().url, format!("/item/{n}"));
        }
    }
}
