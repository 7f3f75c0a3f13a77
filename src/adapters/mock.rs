//! Mock backend for testing and development.
//!
//! The mock source either replays a scripted sequence of messages (tests) or
//! generates synthetic messages over its subscribed topics on an interval
//! (config-built). The mock publisher records everything it is handed and can
//! be slowed down per publish to exercise back-pressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::ConnectionParams;
use crate::message::{Message, Offset};

use super::{AsyncPublisher, AsyncSource, Publisher, Source};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

fn params_u64(params: &ConnectionParams, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

struct MockSourceState {
    connected: bool,
    closed: bool,
    topics: Vec<String>,
    pending: VecDeque<Message>,
    counter: u64,
}

impl MockSourceState {
    fn new(pending: VecDeque<Message>) -> Self {
        Self {
            connected: false,
            closed: false,
            topics: Vec::new(),
            pending,
            counter: 0,
        }
    }
}

/// Mock message source.
pub struct MockSource {
    state: Mutex<MockSourceState>,
    wakeup: Condvar,
    synthetic: bool,
    interval: Duration,
    message_limit: Option<u64>,
    commits: AtomicU64,
}

impl MockSource {
    /// Synthetic source driven by the opaque connection block
    /// (`interval_ms`, optional `message_limit`).
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self {
            state: Mutex::new(MockSourceState::new(VecDeque::new())),
            wakeup: Condvar::new(),
            synthetic: true,
            interval: params_u64(params, "interval_ms")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INTERVAL),
            message_limit: params_u64(params, "message_limit"),
            commits: AtomicU64::new(0),
        }
    }

    /// Source that replays a fixed sequence, then blocks until closed.
    pub fn scripted(messages: Vec<Message>) -> Self {
        Self {
            state: Mutex::new(MockSourceState::new(messages.into())),
            wakeup: Condvar::new(),
            synthetic: false,
            interval: Duration::ZERO,
            message_limit: None,
            commits: AtomicU64::new(0),
        }
    }

    /// Appends a message to the scripted sequence.
    pub fn push(&self, message: Message) {
        let mut state = self.state.lock();
        state.pending.push_back(message);
        self.wakeup.notify_all();
    }

    /// Number of commit calls observed so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn synthetic_message(topic: String, n: u64) -> Message {
        Message::new(topic, format!("mock message {n}").into_bytes())
            .with_header("source", "mock")
            .with_header("count", n.to_string())
            .with_key(format!("key-{n}"))
            .with_offset(Offset::Numeric(n as i64))
            .with_timestamp(Utc::now())
    }
}

impl Source for MockSource {
    fn connect(&self) -> anyhow::Result<()> {
        self.state.lock().connected = true;
        info!("Mock source connected");
        Ok(())
    }

    fn subscribe(&self, topics: &[String]) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.topics = topics.to_vec();
        info!(topics = ?topics, "Mock source subscribed");
        Ok(())
    }

    fn next_message(&self) -> anyhow::Result<Option<Message>> {
        loop {
            let next_topic = {
                let mut state = self.state.lock();
                loop {
                    if state.closed {
                        return Ok(None);
                    }
                    if let Some(message) = state.pending.pop_front() {
                        return Ok(Some(message));
                    }
                    let limit_reached = self
                        .message_limit
                        .is_some_and(|limit| state.counter >= limit);
                    if self.synthetic
                        && state.connected
                        && !state.topics.is_empty()
                        && !limit_reached
                    {
                        state.counter += 1;
                        let index = (state.counter - 1) as usize % state.topics.len();
                        break Some((state.topics[index].clone(), state.counter));
                    }
                    let _ = self
                        .wakeup
                        .wait_for(&mut state, Duration::from_millis(50));
                }
            };

            if let Some((topic, n)) = next_topic {
                // Pace generation outside the lock.
                std::thread::sleep(self.interval);
                if self.state.lock().closed {
                    return Ok(None);
                }
                return Ok(Some(Self::synthetic_message(topic, n)));
            }
        }
    }

    fn commit(&self, message: Option<&Message>) -> anyhow::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(topic = ?message.map(|m| m.topic.as_str()), "Mock source commit");
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.connected = false;
        self.wakeup.notify_all();
        info!("Mock source closed");
        Ok(())
    }
}

/// Mock message publisher recording everything it publishes.
pub struct MockPublisher {
    published: Mutex<Vec<(Message, String)>>,
    connected: AtomicBool,
    flushes: AtomicU64,
    delay: Duration,
}

impl MockPublisher {
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
            delay: params_u64(params, "delay_ms")
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn new() -> Self {
        Self::from_params(&ConnectionParams::new())
    }

    /// Publisher that sleeps `delay` on every publish.
    pub fn with_delay(delay: Duration) -> Self {
        let mut publisher = Self::new();
        publisher.delay = delay;
        publisher
    }

    /// Snapshot of everything published so far, in publish order.
    pub fn published(&self) -> Vec<(Message, String)> {
        self.published.lock().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for MockPublisher {
    fn connect(&self) -> anyhow::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Mock publisher connected");
        Ok(())
    }

    fn publish(&self, message: Message, topic: &str) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        debug!(topic = %topic, bytes = message.payload.len(), "Mock publish");
        self.published.lock().push((message, topic.to_string()));
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        info!(published = self.publish_count(), "Mock publisher flushed");
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Mock publisher closed");
        Ok(())
    }
}

// ============================================
// ASYNC TWINS
// ============================================

/// Suspending twin of [`MockSource`].
pub struct AsyncMockSource {
    state: Mutex<MockSourceState>,
    wakeup: Notify,
    synthetic: bool,
    interval: Duration,
    message_limit: Option<u64>,
    commits: AtomicU64,
}

impl AsyncMockSource {
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self {
            state: Mutex::new(MockSourceState::new(VecDeque::new())),
            wakeup: Notify::new(),
            synthetic: true,
            interval: params_u64(params, "interval_ms")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INTERVAL),
            message_limit: params_u64(params, "message_limit"),
            commits: AtomicU64::new(0),
        }
    }

    pub fn scripted(messages: Vec<Message>) -> Self {
        Self {
            state: Mutex::new(MockSourceState::new(messages.into())),
            wakeup: Notify::new(),
            synthetic: false,
            interval: Duration::ZERO,
            message_limit: None,
            commits: AtomicU64::new(0),
        }
    }

    pub fn push(&self, message: Message) {
        self.state.lock().pending.push_back(message);
        self.wakeup.notify_waiters();
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AsyncSource for AsyncMockSource {
    async fn connect(&self) -> anyhow::Result<()> {
        self.state.lock().connected = true;
        info!("Async mock source connected");
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> anyhow::Result<()> {
        self.state.lock().topics = topics.to_vec();
        info!(topics = ?topics, "Async mock source subscribed");
        Ok(())
    }

    async fn next_message(&self) -> anyhow::Result<Option<Message>> {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_topic = {
                let mut state = self.state.lock();
                if state.closed {
                    return Ok(None);
                }
                if let Some(message) = state.pending.pop_front() {
                    return Ok(Some(message));
                }
                let limit_reached = self
                    .message_limit
                    .is_some_and(|limit| state.counter >= limit);
                if self.synthetic && state.connected && !state.topics.is_empty() && !limit_reached
                {
                    state.counter += 1;
                    let index = (state.counter - 1) as usize % state.topics.len();
                    Some((state.topics[index].clone(), state.counter))
                } else {
                    None
                }
            };

            match next_topic {
                Some((topic, n)) => {
                    tokio::time::sleep(self.interval).await;
                    if self.state.lock().closed {
                        return Ok(None);
                    }
                    return Ok(Some(MockSource::synthetic_message(topic, n)));
                }
                None => {
                    // Wait for a push or close; bounded so a racing close is
                    // never missed.
                    let _ = tokio::time::timeout(Duration::from_millis(50), notified).await;
                }
            }
        }
    }

    async fn commit(&self, message: Option<&Message>) -> anyhow::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(topic = ?message.map(|m| m.topic.as_str()), "Async mock source commit");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.connected = false;
        self.wakeup.notify_waiters();
        info!("Async mock source closed");
        Ok(())
    }
}

/// Suspending twin of [`MockPublisher`].
pub struct AsyncMockPublisher {
    published: Mutex<Vec<(Message, String)>>,
    connected: AtomicBool,
    flushes: AtomicU64,
    delay: Duration,
}

impl AsyncMockPublisher {
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
            delay: params_u64(params, "delay_ms")
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn new() -> Self {
        Self::from_params(&ConnectionParams::new())
    }

    pub fn with_delay(delay: Duration) -> Self {
        let mut publisher = Self::new();
        publisher.delay = delay;
        publisher
    }

    pub fn published(&self) -> Vec<(Message, String)> {
        self.published.lock().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl Default for AsyncMockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AsyncPublisher for AsyncMockPublisher {
    async fn connect(&self) -> anyhow::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Async mock publisher connected");
        Ok(())
    }

    async fn publish(&self, message: Message, topic: &str) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        debug!(topic = %topic, bytes = message.payload.len(), "Async mock publish");
        self.published.lock().push((message, topic.to_string()));
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        info!(published = self.publish_count(), "Async mock publisher flushed");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Async mock publisher closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_scripted_source_replays_in_order() {
        let source = MockSource::scripted(vec![
            Message::new("a", b"1".to_vec()),
            Message::new("a", b"2".to_vec()),
        ]);
        source.connect().unwrap();

        assert_eq!(source.next_message().unwrap().unwrap().payload, b"1".to_vec());
        assert_eq!(source.next_message().unwrap().unwrap().payload, b"2".to_vec());
    }

    #[test]
    fn test_scripted_source_blocks_then_ends_on_close() {
        let source = Arc::new(MockSource::scripted(vec![]));
        source.connect().unwrap();

        let consumer = {
            let source = source.clone();
            std::thread::spawn(move || source.next_message().unwrap())
        };

        std::thread::sleep(Duration::from_millis(30));
        assert!(!consumer.is_finished());

        source.close().unwrap();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_synthetic_source_cycles_topics() {
        let mut params = ConnectionParams::new();
        params.insert("interval_ms".to_string(), serde_json::json!(1));
        let source = MockSource::from_params(&params);
        source.connect().unwrap();
        source
            .subscribe(&["t1".to_string(), "t2".to_string()])
            .unwrap();

        let first = source.next_message().unwrap().unwrap();
        let second = source.next_message().unwrap().unwrap();
        assert_eq!(first.topic, "t1");
        assert_eq!(second.topic, "t2");
        assert_eq!(first.header("source"), Some("mock"));
        assert!(first.offset.is_some());
    }

    #[test]
    fn test_synthetic_source_honors_limit() {
        let mut params = ConnectionParams::new();
        params.insert("interval_ms".to_string(), serde_json::json!(1));
        params.insert("message_limit".to_string(), serde_json::json!(2));
        let source = Arc::new(MockSource::from_params(&params));
        source.connect().unwrap();
        source.subscribe(&["t".to_string()]).unwrap();

        assert!(source.next_message().unwrap().is_some());
        assert!(source.next_message().unwrap().is_some());

        // Past the limit the source blocks; close ends the stream.
        let consumer = {
            let source = source.clone();
            std::thread::spawn(move || source.next_message().unwrap())
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(!consumer.is_finished());
        source.close().unwrap();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_publisher_records_and_flushes() {
        let publisher = MockPublisher::new();
        publisher.connect().unwrap();
        publisher
            .publish(Message::new("in", b"x".to_vec()), "out")
            .unwrap();
        publisher.flush().unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, "out");
        assert_eq!(publisher.flush_count(), 1);
    }

    #[test]
    fn test_commit_counter() {
        let source = MockSource::scripted(vec![Message::new("a", b"1".to_vec())]);
        let message = source.next_message().unwrap().unwrap();
        source.commit(Some(&message)).unwrap();
        source.commit(None).unwrap();
        assert_eq!(source.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_async_scripted_source() {
        let source = AsyncMockSource::scripted(vec![Message::new("a", b"1".to_vec())]);
        source.connect().await.unwrap();
        let message = source.next_message().await.unwrap().unwrap();
        assert_eq!(message.payload, b"1".to_vec());

        source.close().await.unwrap();
        assert!(source.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_async_publisher_records() {
        let publisher = AsyncMockPublisher::new();
        publisher.connect().await.unwrap();
        publisher
            .publish(Message::new("in", b"x".to_vec()), "out")
            .await
            .unwrap();
        assert_eq!(publisher.publish_count(), 1);
    }
}
