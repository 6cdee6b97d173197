// Bounded epoch queue
//
// The hand-off point between the ingestion task and consumers. A single lock
// over a VecDeque keeps strict insertion order and makes push, pop and
// snapshot atomic with respect to each other; a Notify wakes async consumers
// so nobody has to poll. Overflow behavior is fixed at construction: evict
// the oldest epoch (consume-on-read sessions) or refuse the push.

use crate::epoch::Epoch;
use crate::types::{StreamError, StreamResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Counters for queue monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueMetrics {
    pub total_pushed: u64,
    pub total_popped: u64,
    pub total_evicted: u64,
    pub total_dropped: u64,
    pub current_len: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Epoch>,
    closed: bool,
}

/// Bounded FIFO of accepted epochs
#[derive(Debug)]
pub struct EpochQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    consume_on_read: bool,
    total_pushed: AtomicU64,
    total_popped: AtomicU64,
    total_evicted: AtomicU64,
    total_dropped: AtomicU64,
}

impl EpochQueue {
    pub fn new(capacity: usize, consume_on_read: bool) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            consume_on_read,
            total_pushed: AtomicU64::new(0),
            total_popped: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Append an epoch.
    ///
    /// At capacity, consume-on-read sessions evict the single oldest queued
    /// epoch to make room; retain sessions fail with `QueueFull` and the
    /// epoch is not stored. A closed queue refuses all pushes.
    pub fn push(&self, epoch: Epoch) -> StreamResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(StreamError::ChannelClosed);
            }
            if inner.items.len() >= self.capacity {
                if self.consume_on_read {
                    inner.items.pop_front();
                    self.total_evicted.fetch_add(1, Ordering::Relaxed);
                    log::warn!("epoch queue full, oldest epoch evicted");
                } else {
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(StreamError::QueueFull {
                        capacity: self.capacity,
                    });
                }
            }
            inner.items.push_back(epoch);
            self.total_pushed.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return the oldest queued epoch.
    pub fn pop_oldest(&self) -> StreamResult<Epoch> {
        let mut inner = self.inner.lock();
        match inner.items.pop_front() {
            Some(epoch) => {
                self.total_popped.fetch_add(1, Ordering::Relaxed);
                Ok(epoch)
            }
            None => Err(StreamError::QueueEmpty),
        }
    }

    /// Snapshot of all queued epochs, oldest first, without consuming them.
    pub fn peek_all(&self) -> Vec<Epoch> {
        let inner = self.inner.lock();
        inner.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark the stream of epochs finished and wake all waiting consumers.
    /// Queued epochs remain poppable; only the arrival of new ones ends.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Wait until an epoch is queued or the queue is closed and drained.
    /// Returns true when an epoch is available; false means no further
    /// epochs will ever arrive.
    pub async fn wait_for_next(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock();
                if !inner.items.is_empty() {
                    return true;
                }
                if inner.closed {
                    return false;
                }
            }
            notified.await;
        }
    }

    /// Wait for and pop the next epoch; None once the queue is closed and
    /// drained. The consumer loop analog of iterating a finite stream.
    pub async fn next_epoch(&self) -> Option<Epoch> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(epoch) = inner.items.pop_front() {
                    self.total_popped.fetch_add(1, Ordering::Relaxed);
                    return Some(epoch);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_popped: self.total_popped.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            current_len: self.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochStatus;
    use crate::events::TriggerEvent;
    use std::sync::Arc;

    fn test_epoch(sample: u64) -> Epoch {
        Epoch {
            event: TriggerEvent { sample, code: 5 },
            label: "left".to_string(),
            channels: vec![0],
            first_sample: sample.saturating_sub(2),
            data: vec![vec![1.0, 2.0, 3.0]],
            status: EpochStatus::Accepted,
        }
    }

    #[test]
    fn test_push_pop_order() {
        let queue = EpochQueue::new(8, true);
        queue.push(test_epoch(10)).unwrap();
        queue.push(test_epoch(20)).unwrap();
        queue.push(test_epoch(30)).unwrap();

        assert_eq!(queue.pop_oldest().unwrap().event.sample, 10);
        assert_eq!(queue.pop_oldest().unwrap().event.sample, 20);
        assert_eq!(queue.pop_oldest().unwrap().event.sample, 30);
        assert!(matches!(queue.pop_oldest(), Err(StreamError::QueueEmpty)));
    }

    #[test]
    fn test_consume_mode_evicts_oldest() {
        let queue = EpochQueue::new(3, true);
        for s in [1, 2, 3, 4] {
            queue.push(test_epoch(s)).unwrap();
        }

        assert_eq!(queue.len(), 3);
        let samples: Vec<u64> = queue.peek_all().iter().map(|e| e.event.sample).collect();
        assert_eq!(samples, vec![2, 3, 4]);
        assert_eq!(queue.metrics().total_evicted, 1);
    }

    #[test]
    fn test_retain_mode_refuses_push() {
        let queue = EpochQueue::new(3, false);
        for s in [1, 2, 3] {
            queue.push(test_epoch(s)).unwrap();
        }

        match queue.push(test_epoch(4)) {
            Err(StreamError::QueueFull { capacity }) => assert_eq!(capacity, 3),
            other => panic!("expected QueueFull, got {:?}", other),
        }

        // contents unchanged
        let samples: Vec<u64> = queue.peek_all().iter().map(|e| e.event.sample).collect();
        assert_eq!(samples, vec![1, 2, 3]);
        assert_eq!(queue.metrics().total_dropped, 1);
    }

    #[test]
    fn test_peek_all_does_not_consume() {
        let queue = EpochQueue::new(4, true);
        queue.push(test_epoch(1)).unwrap();
        queue.push(test_epoch(2)).unwrap();

        assert_eq!(queue.peek_all().len(), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.metrics().total_popped, 0);
    }

    #[tokio::test]
    async fn test_next_epoch_wakes_on_push() {
        let queue = Arc::new(EpochQueue::new(4, true));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_epoch().await })
        };

        // give the consumer a moment to park
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        queue.push(test_epoch(42)).unwrap();

        let epoch = consumer.await.unwrap();
        assert_eq!(epoch.unwrap().event.sample, 42);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = Arc::new(EpochQueue::new(4, true));
        queue.push(test_epoch(1)).unwrap();
        queue.push(test_epoch(2)).unwrap();
        queue.close();

        // queued epochs are still delivered after close
        assert_eq!(queue.next_epoch().await.unwrap().event.sample, 1);
        assert!(queue.wait_for_next().await);
        assert_eq!(queue.next_epoch().await.unwrap().event.sample, 2);

        // then the stream ends
        assert!(queue.next_epoch().await.is_none());
        assert!(!queue.wait_for_next().await);
    }

    #[test]
    fn test_closed_queue_refuses_push() {
        let queue = EpochQueue::new(4, true);
        queue.push(test_epoch(1)).unwrap();
        queue.close();

        assert!(matches!(
            queue.push(test_epoch(2)),
            Err(StreamError::ChannelClosed)
        ));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_close_wakes_parked_consumer() {
        let queue = Arc::new(EpochQueue::new(4, true));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_epoch().await })
        };

        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
    }
}
