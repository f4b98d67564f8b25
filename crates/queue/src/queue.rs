//! Task queues feeding the worker pools.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;

/// An ordered, unbounded queue of pending messages for one pipeline.
///
/// Pushing never blocks and never discards; any backpressure is applied by
/// the consuming worker pool, not here. Pop order is insertion order per
/// producer. Safe for concurrent producers and consumers.
///
/// Cancellation composes at the call site: race [`TaskQueue::pop`] against a
/// shutdown signal with `tokio::select!`.
pub struct TaskQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    // Counts queued items; popping consumes a permit, so a resolved acquire
    // guarantees an item is present.
    ready: Semaphore,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                ready: Semaphore::new(0),
            }),
        }
    }

    /// Append a message to the tail of the queue.
    pub fn push(&self, msg: T) {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(msg);
        self.inner.ready.add_permits(1);
    }

    /// Remove and return the head of the queue, waiting until a message is
    /// available.
    pub async fn pop(&self) -> T {
        loop {
            if let Ok(permit) = self.inner.ready.acquire().await {
                permit.forget();
                if let Some(item) = self
                    .inner
                    .items
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front()
                {
                    return item;
                }
            }
        }
    }

    /// Remove and return the head of the queue if one is immediately
    /// available. Used by the shutdown persistence drain.
    pub fn try_pop(&self) -> Option<T> {
        let permit = self.inner.ready.try_acquire().ok()?;
        permit.forget();
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Current queue depth. Best-effort; for metrics only, never for control
    /// decisions.
    pub fn len(&self) -> usize {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let queue = TaskQueue::new();
        queue.push(1u32);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.pop().await, 1);
        assert_eq!(queue.pop().await, 2);
        assert_eq!(queue.pop().await, 3);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = TaskQueue::new();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        // Give the consumer a moment to block on the empty queue.
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(42u32);

        assert_eq!(consumer.await.ok(), Some(42));
    }

    #[tokio::test]
    async fn test_try_pop_empty() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn test_try_pop_drains_in_order() {
        let queue = TaskQueue::new();
        queue.push("a");
        queue.push("b");

        assert_eq!(queue.try_pop(), Some("a"));
        assert_eq!(queue.try_pop(), Some("b"));
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_len_tracks_pushes() {
        let queue = TaskQueue::new();
        assert_eq!(queue.len(), 0);

        queue.push(1u32);
        queue.push(2);
        assert_eq!(queue.len(), 2);

        let _ = queue.pop().await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_and_consumers() {
        let queue = TaskQueue::new();
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..25u32 {
                        queue.push(p * 100 + i);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.ok();
        }

        let mut seen = Vec::new();
        while let Some(item) = queue.try_pop() {
            seen.push(item);
        }
        assert_eq!(seen.len(), 100);

        // Each producer's own pushes come out in its push order.
        for p in 0..4u32 {
            let per_producer: Vec<_> = seen.iter().filter(|v| **v / 100 == p).collect();
            assert!(per_producer.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
