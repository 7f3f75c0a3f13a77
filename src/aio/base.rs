//! Cooperative flow engine core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::AsyncPublisher;
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::flow::FlowStats;
use crate::message::Message;
use crate::metrics::MetricsRegistry;
use crate::processor::AsyncProcessor;
use crate::queue::AsyncQueue;

pub(crate) const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);
pub(crate) const GATE_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type QueueItem = (Message, String);

/// Sticky event, cooperative twin of the threaded `Signal`.
pub(crate) struct AsyncSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl AsyncSignal {
    pub(crate) fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Shared scaffolding for the three async topologies.
pub struct AsyncFlowEngine {
    pub(crate) thread_pool: ThreadPoolConfig,
    pub(crate) back_pressure: BackPressureConfig,
    pub(crate) processor: Arc<dyn AsyncProcessor>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) domain_queue: Arc<AsyncQueue<QueueItem>>,
    pub(crate) publish_queue: Arc<AsyncQueue<QueueItem>>,
    running: AtomicBool,
    workers_live: AtomicBool,
    started: AtomicBool,
    shutdown_requested: AsyncSignal,
    stopped: AsyncSignal,
}

impl AsyncFlowEngine {
    pub fn new(
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn AsyncProcessor>,
    ) -> Self {
        let queue_size = thread_pool.queue_size;
        Self {
            thread_pool,
            back_pressure,
            processor,
            metrics: Arc::new(MetricsRegistry::new()),
            domain_queue: Arc::new(AsyncQueue::new(queue_size)),
            publish_queue: Arc::new(AsyncQueue::new(queue_size)),
            running: AtomicBool::new(false),
            workers_live: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown_requested: AsyncSignal::new(),
            stopped: AsyncSignal::new(),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    pub fn stats(&self) -> FlowStats {
        FlowStats {
            domain_depth: self.domain_queue.len(),
            publish_depth: self.publish_queue.len(),
            queue_capacity: self.thread_pool.queue_size,
        }
    }

    pub(crate) fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn workers_live(&self) -> bool {
        self.workers_live.load(Ordering::SeqCst)
    }

    pub(crate) fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn shutdown_and_wait(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_requested.set();
        if self.started.load(Ordering::SeqCst) {
            self.stopped.wait().await;
        }
    }

    pub(crate) async fn wait_for_shutdown(&self) {
        self.shutdown_requested.wait().await;
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) async fn gate(&self, queue: &AsyncQueue<QueueItem>) {
        if !self.back_pressure.enabled {
            return;
        }
        if queue.fill_ratio() < self.back_pressure.queue_high_watermark {
            return;
        }
        debug!("Back-pressure engaged, waiting for queue to drain");
        while self.running() {
            if queue.fill_ratio() <= self.back_pressure.queue_low_watermark {
                break;
            }
            tokio::time::sleep(GATE_POLL_INTERVAL).await;
        }
    }

    pub(crate) fn spawn_domain_workers(engine: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..engine.thread_pool.max_workers)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.domain_worker().await })
            })
            .collect()
    }

    pub(crate) fn spawn_publish_workers(
        engine: &Arc<Self>,
        publisher: Arc<dyn AsyncPublisher>,
    ) -> Vec<JoinHandle<()>> {
        (0..engine.thread_pool.max_workers)
            .map(|_| {
                let engine = engine.clone();
                let publisher = publisher.clone();
                tokio::spawn(async move { engine.publish_worker(publisher.as_ref()).await })
            })
            .collect()
    }

    async fn domain_worker(&self) {
        while self.workers_live() {
            let Some((message, dest_topic)) = self.domain_queue.get(DEQUEUE_TIMEOUT).await else {
                continue;
            };

            let source_topic = message.topic.clone();
            match self.processor.process(message).await {
                Ok(processed) => {
                    self.gate(&self.publish_queue).await;
                    self.publish_queue.put((processed, dest_topic)).await;
                }
                Err(e) => {
                    error!(topic = %source_topic, error = %e, "Error in domain processing");
                    self.metrics.record_source_error(&source_topic);
                }
            }
            self.domain_queue.task_done();
        }
    }

    async fn publish_worker(&self, publisher: &dyn AsyncPublisher) {
        while self.workers_live() {
            let Some((message, dest_topic)) = self.publish_queue.get(DEQUEUE_TIMEOUT).await else {
                continue;
            };

            let size = message.size();
            match publisher.publish(message, &dest_topic).await {
                Ok(()) => self.metrics.record_destination_message(&dest_topic, size),
                Err(e) => {
                    error!(topic = %dest_topic, error = %e, "Error publishing message");
                    self.metrics.record_destination_error(&dest_topic);
                }
            }
            self.publish_queue.task_done();
        }
    }

    pub(crate) async fn drain_and_stop(
        &self,
        domain_workers: Vec<JoinHandle<()>>,
        publish_workers: Vec<JoinHandle<()>>,
    ) {
        // Workers stay live through both joins so in-flight work drains.
        self.domain_queue.join().await;
        self.publish_queue.join().await;

        self.workers_live.store(false, Ordering::SeqCst);
        join_with_timeout(domain_workers, JOIN_TIMEOUT, "domain worker").await;
        join_with_timeout(publish_workers, JOIN_TIMEOUT, "publish worker").await;

        self.domain_queue.close();
        self.publish_queue.close();
    }

    pub(crate) fn mark_stopped(&self) {
        info!("Flow shutdown complete");
        self.stopped.set();
    }
}

/// Awaits each task with a soft deadline; expired tasks are aborted.
pub(crate) async fn join_with_timeout(handles: Vec<JoinHandle<()>>, timeout: Duration, what: &str) {
    for mut handle in handles {
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {}
            Err(_) => {
                warn!(task = what, timeout = ?timeout, "Task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AsyncMockPublisher;
    use crate::processor::AsyncPassThroughProcessor;

    fn engine(max_workers: usize, queue_size: usize) -> Arc<AsyncFlowEngine> {
        Arc::new(AsyncFlowEngine::new(
            ThreadPoolConfig { max_workers, queue_size },
            BackPressureConfig::default(),
            Arc::new(AsyncPassThroughProcessor),
        ))
    }

    #[tokio::test]
    async fn test_async_signal() {
        let signal = Arc::new(AsyncSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        signal.set();
        waiter.await.unwrap();
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_gate_releases_on_shutdown() {
        let engine = engine(1, 10);
        engine.start();
        for i in 0..10 {
            engine
                .publish_queue
                .put((Message::new("t", vec![]), format!("d{i}")))
                .await;
        }

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.gate(&engine.publish_queue).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        engine.running.store(false, Ordering::SeqCst);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_workers_drain_queues_during_shutdown() {
        let engine = engine(2, 50);
        engine.start();
        let publisher = Arc::new(AsyncMockPublisher::new());

        let domain = AsyncFlowEngine::spawn_domain_workers(&engine);
        let publish = AsyncFlowEngine::spawn_publish_workers(&engine, publisher.clone());

        for i in 0..20 {
            engine
                .domain_queue
                .put((Message::new("in", format!("{i}").into_bytes()), "out".to_string()))
                .await;
        }

        engine.running.store(false, Ordering::SeqCst);
        engine.drain_and_stop(domain, publish).await;

        assert_eq!(publisher.publish_count(), 20);
        assert_eq!(engine.domain_queue.len(), 0);
        assert_eq!(engine.publish_queue.len(), 0);
    }
}
