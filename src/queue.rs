//! Bounded FIFO queues with fill-ratio watermark surface.
//!
//! Both queue flavors implement the same contract: `put` blocks while the
//! queue is full, `get` waits up to a timeout, and `task_done`/`join` track
//! in-flight items so shutdown can drain the pipeline deterministically.
//! The blocking `put` is the hard back-pressure limit; the watermark gate in
//! the flow layer reads `fill_ratio` to engage before that limit is hit.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

struct QueueState<T> {
    items: VecDeque<T>,
    unfinished: usize,
    closed: bool,
}

impl<T> QueueState<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            unfinished: 0,
            closed: false,
        }
    }
}

// ============================================
// BLOCKING QUEUE (threaded flows)
// ============================================

/// Bounded blocking FIFO used by the threaded flow engine.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState::new(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            drained: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues an item, blocking while the queue is full.
    ///
    /// Returns false if the queue was closed before the item could be
    /// inserted; the item is dropped in that case.
    pub fn put(&self, item: T) -> bool {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity {
            if state.closed {
                return false;
            }
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        state.unfinished += 1;
        self.not_empty.notify_one();
        true
    }

    /// Dequeues an item, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout or once the queue is closed and empty.
    pub fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                let item = state.items.pop_front();
                if item.is_some() {
                    self.not_full.notify_one();
                }
                return item;
            }
        }
    }

    /// Marks one delivered item as fully processed.
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.unfinished > 0, "task_done called more times than put");
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.drained.notify_all();
        }
    }

    /// Blocks until every put has been matched by a `task_done`.
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            self.drained.wait(&mut state);
        }
    }

    /// Closes the queue, waking all blocked producers and consumers.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.drained.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Count of items delivered but not yet marked done, plus queued items.
    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}

// ============================================
// ASYNC QUEUE (cooperative flow variant)
// ============================================

/// Bounded FIFO with the same contract as [`BoundedQueue`], built on
/// cooperative suspension for the async flow variant.
pub struct AsyncQueue<T> {
    state: parking_lot::Mutex<QueueState<T>>,
    not_empty: Notify,
    not_full: Notify,
    drained: Notify,
    capacity: usize,
}

impl<T> AsyncQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: parking_lot::Mutex::new(QueueState::new(capacity)),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            drained: Notify::new(),
            capacity,
        }
    }

    /// Enqueues an item, suspending while the queue is full.
    pub async fn put(&self, item: T) -> bool {
        let mut item = Some(item);
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return false;
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(item.take().expect("item consumed twice"));
                    state.unfinished += 1;
                    self.not_empty.notify_one();
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Dequeues an item, suspending up to `timeout`.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.get_wait())
            .await
            .ok()
            .flatten()
    }

    async fn get_wait(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn task_done(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.unfinished > 0, "task_done called more times than put");
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Suspends until every put has been matched by a `task_done`.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.lock().unfinished == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        self.drained.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_get_fifo() {
        let queue = BoundedQueue::new(4);
        assert!(queue.put(1));
        assert!(queue.put(2));
        assert_eq!(queue.get(Duration::from_millis(10)), Some(1));
        assert_eq!(queue.get(Duration::from_millis(10)), Some(2));
        assert_eq!(queue.get(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_fill_ratio_tracks_size() {
        let queue = BoundedQueue::new(10);
        for i in 0..5 {
            queue.put(i);
        }
        assert_eq!(queue.len(), 5);
        assert!((queue.fill_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_put_blocks_until_space() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put(1);

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.put(2))
        };

        // The producer cannot finish until we drain a slot.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(queue.get(Duration::from_millis(100)), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.get(Duration::from_millis(100)), Some(2));
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let queue = Arc::new(BoundedQueue::new(3));
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..20 {
                    queue.put(i);
                }
            })
        };

        let mut seen = 0;
        while seen < 20 {
            assert!(queue.len() <= queue.capacity());
            if queue.get(Duration::from_millis(50)).is_some() {
                seen += 1;
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_join_waits_for_task_done() {
        let queue = Arc::new(BoundedQueue::new(4));
        queue.put(1);

        let joiner = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.join())
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!joiner.is_finished());

        queue.get(Duration::from_millis(10)).unwrap();
        // Dequeued but still in flight.
        std::thread::sleep(Duration::from_millis(20));
        assert!(!joiner.is_finished());

        queue.task_done();
        joiner.join().unwrap();
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put(1);

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.put(2))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn test_get_after_close_drains_then_ends() {
        let queue = BoundedQueue::new(4);
        queue.put(7);
        queue.close();
        assert_eq!(queue.get(Duration::from_millis(10)), Some(7));
        assert_eq!(queue.get(Duration::from_millis(10)), None);
    }

    #[tokio::test]
    async fn test_async_put_get_fifo() {
        let queue = AsyncQueue::new(4);
        assert!(queue.put(1).await);
        assert!(queue.put(2).await);
        assert_eq!(queue.get(Duration::from_millis(10)).await, Some(1));
        assert_eq!(queue.get(Duration::from_millis(10)).await, Some(2));
        assert_eq!(queue.get(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn test_async_put_suspends_until_space() {
        let queue = Arc::new(AsyncQueue::new(1));
        queue.put(1).await;

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.get(Duration::from_millis(100)).await, Some(1));
        assert!(producer.await.unwrap());
        assert_eq!(queue.get(Duration::from_millis(100)).await, Some(2));
    }

    #[tokio::test]
    async fn test_async_join_waits_for_task_done() {
        let queue = Arc::new(AsyncQueue::new(4));
        queue.put(1).await;
        queue.get(Duration::from_millis(10)).await.unwrap();

        let joiner = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.join().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joiner.is_finished());

        queue.task_done();
        joiner.await.unwrap();
    }

    #[tokio::test]
    async fn test_async_close_wakes_producer() {
        let queue = Arc::new(AsyncQueue::new(1));
        queue.put(1).await;

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(!producer.await.unwrap());
    }
}
