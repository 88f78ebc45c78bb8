//! Bounded multi-producer / multi-consumer work queue
//!
//! The only hand-off between file discovery and the workers. Built on a
//! bounded `tokio::sync::mpsc` channel whose receiver is shared behind a mutex,
//! so each item is received by exactly one consumer.
//!
//! Termination is by closure: when every [`QueueProducer`] is dropped and the
//! buffer drains, [`QueueConsumer::dequeue`] returns `None` to all consumers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::models::FileRecord;

#[derive(Debug, Default)]
struct QueueStats {
    enqueued: AtomicUsize,
    dequeued: AtomicUsize,
}

/// Create a queue holding at most `capacity` records.
pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(QueueStats::default());
    (
        QueueProducer {
            tx,
            stats: stats.clone(),
        },
        QueueConsumer {
            rx: Arc::new(Mutex::new(rx)),
            stats,
        },
    )
}

/// Returned by enqueue when every consumer is gone.
#[derive(Debug, thiserror::Error)]
#[error("work queue closed, '{}' was not enqueued", .0.file_name)]
pub struct QueueClosed(pub FileRecord);

/// Sending half. Clone for additional producers; drop all to signal end of work.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<FileRecord>,
    stats: Arc<QueueStats>,
}

impl QueueProducer {
    /// Enqueue a record, blocking the thread while the queue is full.
    ///
    /// Must not be called from within an async task.
    pub fn blocking_enqueue(&self, record: FileRecord) -> Result<(), QueueClosed> {
        self.tx.blocking_send(record).map_err(|e| QueueClosed(e.0))?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Receiving half, shared by all workers.
#[derive(Debug, Clone)]
pub struct QueueConsumer {
    rx: Arc<Mutex<mpsc::Receiver<FileRecord>>>,
    stats: Arc<QueueStats>,
}

impl QueueConsumer {
    /// Take the next record, waiting until one arrives.
    ///
    /// `None` means end of work: producers are gone and the queue is drained.
    pub async fn dequeue(&self) -> Option<FileRecord> {
        let record = self.rx.lock().await.recv().await;
        if record.is_some() {
            self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Counters that outlive the consumer without keeping the receiver open.
    pub fn counters(&self) -> QueueCounters {
        QueueCounters(self.stats.clone())
    }
}

/// Read-only view of the enqueue/dequeue counters.
#[derive(Debug, Clone)]
pub struct QueueCounters(Arc<QueueStats>);

impl QueueCounters {
    pub fn enqueued(&self) -> usize {
        self.0.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> usize {
        self.0.dequeued.load(Ordering::Relaxed)
    }
}
