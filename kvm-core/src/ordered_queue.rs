//! Bounded, time-ordered reassembly buffer (spec.md §4.B).
//!
//! Messages may arrive out of order relative to their `timestamp`. The
//! queue holds them in a min-heap keyed by `(timestamp, sequence_id)` and
//! releases them once they are "ready" — old enough that later arrivals
//! are no longer expected — so a consumer sees non-decreasing timestamps
//! without blocking forever on a message that never shows up.

use crate::protocol::ProtocolMessage;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrderedQueueConfig {
    /// Hard cap per worker queue; overflow truncates the oldest entries.
    pub max_queue_size: usize,
    /// A message becomes ready this long after its own timestamp.
    pub max_delay_tolerance: Duration,
    /// Number of independent worker queues (ordering holds within one).
    pub parallel_processors: usize,
    /// Messages older than this are force-flushed regardless of the
    /// normal delay-tolerance check.
    pub force_flush_age: Duration,
}

impl Default for OrderedQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_delay_tolerance: Duration::from_millis(100),
            parallel_processors: 2,
            force_flush_age: Duration::from_secs(1),
        }
    }
}

/// `(timestamp, sequence_id)` ordering wrapper. `f64::total_cmp` gives a
/// total order over timestamps without pulling in a NaN-free float crate.
struct Entry(ProtocolMessage);

impl Entry {
    fn key(&self) -> (f64, u64) {
        (self.0.timestamp, self.0.sequence_id)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key().0.total_cmp(&other.key().0) == std::cmp::Ordering::Equal && self.key().1 == other.key().1
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let (ts, seq) = self.key();
        let (ots, oseq) = other.key();
        ts.total_cmp(&ots).then(seq.cmp(&oseq))
    }
}

pub fn now_epoch_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Min-heap-by-timestamp queues, one per worker, routed by
/// `sequence_id % parallel_processors` (spec.md §4.B).
pub struct OrderedQueue {
    config: OrderedQueueConfig,
    workers: Vec<Mutex<BinaryHeap<Reverse<Entry>>>>,
}

impl OrderedQueue {
    pub fn new(config: OrderedQueueConfig) -> Arc<Self> {
        let n = config.parallel_processors.max(1);
        let workers = (0..n).map(|_| Mutex::new(BinaryHeap::new())).collect();
        Arc::new(Self { config, workers })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn worker_for(&self, sequence_id: u64) -> usize {
        (sequence_id as usize) % self.workers.len()
    }

    /// Insert a message, truncating the oldest entries if the worker's
    /// queue exceeds `max_queue_size` (spec.md: "a deliberate choice for
    /// real-time input where stale events are worthless").
    pub fn enqueue(&self, message: ProtocolMessage) {
        let idx = self.worker_for(message.sequence_id);
        let mut heap = self.workers[idx].lock();
        heap.push(Reverse(Entry(message)));
        while heap.len() > self.config.max_queue_size {
            heap.pop();
        }
    }

    /// Remove and return every message in `worker_idx`'s queue that is
    /// ready for delivery at `now` (non-decreasing timestamp order).
    pub fn drain_ready(&self, worker_idx: usize, now: f64) -> Vec<ProtocolMessage> {
        let mut heap = self.workers[worker_idx].lock();
        let mut out = Vec::new();
        while let Some(Reverse(entry)) = heap.peek() {
            let age = now - entry.key().0;
            let ready = age >= self.config.max_delay_tolerance.as_secs_f64();
            let force = age >= self.config.force_flush_age.as_secs_f64();
            if ready || force {
                if let Some(Reverse(entry)) = heap.pop() {
                    out.push(entry.0);
                }
            } else {
                break;
            }
        }
        out
    }

    pub fn len(&self, worker_idx: usize) -> usize {
        self.workers[worker_idx].lock().len()
    }

    pub fn is_empty(&self, worker_idx: usize) -> bool {
        self.len(worker_idx) == 0
    }

    /// Spawn one background task per worker that drains ready messages and
    /// hands them to `callback`, ticking every ~5ms while draining and
    /// ~20ms while idle (spec.md §4.B).
    pub fn spawn<F>(self: &Arc<Self>, callback: F, cancel: CancellationToken) -> Vec<JoinHandle<()>>
    where
        F: Fn(ProtocolMessage) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        (0..self.workers.len())
            .map(|idx| {
                let queue = Arc::clone(self);
                let callback = Arc::clone(&callback);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let ready = queue.drain_ready(idx, now_epoch_secs());
                        let drained = !ready.is_empty();
                        for message in ready {
                            callback(message);
                        }
                        let tick = if drained { Duration::from_millis(5) } else { Duration::from_millis(20) };
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(tick) => {}
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Payload;

    fn msg_at(timestamp: f64, sequence_id: u64) -> ProtocolMessage {
        ProtocolMessage {
            message_type: "mouse".into(),
            timestamp,
            sequence_id,
            payload: Payload::new(),
            source: None,
            target: None,
            message_id: None,
            chunk_index: None,
            total_chunks: None,
            is_chunk: false,
        }
    }

    #[test]
    fn delivers_in_timestamp_order_from_one_worker() {
        let queue = OrderedQueue::new(OrderedQueueConfig {
            parallel_processors: 1,
            max_delay_tolerance: Duration::from_millis(100),
            ..Default::default()
        });
        // Enqueued out of order; sequence_ids deliberately don't match
        // timestamp order either.
        queue.enqueue(msg_at(1.00, 1));
        queue.enqueue(msg_at(1.05, 4));
        queue.enqueue(msg_at(1.02, 2));
        queue.enqueue(msg_at(1.10, 3));

        // Nothing is ready yet "now" (all within the delay tolerance).
        assert!(queue.drain_ready(0, 1.10).is_empty());

        // Once enough time has passed for every message, they come out in
        // non-decreasing timestamp order (S6).
        let drained = queue.drain_ready(0, 1.25);
        let timestamps: Vec<f64> = drained.iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![1.00, 1.02, 1.05, 1.10]);
    }

    #[test]
    fn routes_by_sequence_id_modulo_worker_count() {
        let queue = OrderedQueue::new(OrderedQueueConfig { parallel_processors: 2, ..Default::default() });
        queue.enqueue(msg_at(1.0, 2));
        queue.enqueue(msg_at(1.0, 4));
        queue.enqueue(msg_at(1.0, 3));
        assert_eq!(queue.len(0), 2);
        assert_eq!(queue.len(1), 1);
    }

    #[test]
    fn overflow_truncates_oldest_entries() {
        let queue = OrderedQueue::new(OrderedQueueConfig { parallel_processors: 1, max_queue_size: 2, ..Default::default() });
        queue.enqueue(msg_at(1.0, 1));
        queue.enqueue(msg_at(2.0, 2));
        queue.enqueue(msg_at(3.0, 3));
        assert_eq!(queue.len(0), 2);
        let remaining = queue.drain_ready(0, 1000.0);
        let timestamps: Vec<f64> = remaining.iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![2.0, 3.0]);
    }

    #[test]
    fn force_flush_overrides_delay_tolerance() {
        let queue = OrderedQueue::new(OrderedQueueConfig {
            parallel_processors: 1,
            max_delay_tolerance: Duration::from_secs(10),
            force_flush_age: Duration::from_secs(1),
            ..Default::default()
        });
        queue.enqueue(msg_at(1.0, 1));
        // Not ready under the (generous) delay tolerance, but older than
        // force_flush_age, so it is flushed anyway.
        let drained = queue.drain_ready(0, 2.5);
        assert_eq!(drained.len(), 1);
    }
}
