//! Threaded flow engine core.
//!
//! Owns the two bounded queues, the domain and publish worker pools, the
//! back-pressure gate and the shutdown protocol. The three topologies differ
//! only in how their consumer tasks fill the domain queue; everything from
//! the domain queue onward is identical.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::adapters::Publisher;
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::message::Message;
use crate::metrics::MetricsRegistry;
use crate::processor::Processor;
use crate::queue::BoundedQueue;

/// Dequeue timeout for worker loops; bounds how long a worker can miss a
/// state change.
pub(crate) const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Poll interval of the back-pressure gate.
pub(crate) const GATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Soft limit for joining a task during shutdown; expired tasks are
/// abandoned with daemon semantics.
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type QueueItem = (Message, String);

/// Manually reset-free event in the style of `threading.Event`.
pub(crate) struct Signal {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.state.lock()
    }

    pub(crate) fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.cond.wait(&mut state);
        }
    }
}

/// Queue depths exposed for monitoring and tests.
#[derive(Debug, Clone)]
pub struct FlowStats {
    pub domain_depth: usize,
    pub publish_depth: usize,
    pub queue_capacity: usize,
}

/// Shared scaffolding for the three threaded topologies.
pub struct FlowEngine {
    pub(crate) thread_pool: ThreadPoolConfig,
    pub(crate) back_pressure: BackPressureConfig,
    pub(crate) processor: Arc<dyn Processor>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) domain_queue: Arc<BoundedQueue<QueueItem>>,
    pub(crate) publish_queue: Arc<BoundedQueue<QueueItem>>,
    /// Cleared first on shutdown: consumers and gate waiters key off this.
    running: AtomicBool,
    /// Cleared after the queues drain: workers key off this.
    workers_live: AtomicBool,
    started: AtomicBool,
    shutdown_requested: Signal,
    stopped: Signal,
}

impl FlowEngine {
    pub fn new(
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn Processor>,
    ) -> Self {
        let queue_size = thread_pool.queue_size;
        Self {
            thread_pool,
            back_pressure,
            processor,
            metrics: Arc::new(MetricsRegistry::new()),
            domain_queue: Arc::new(BoundedQueue::new(queue_size)),
            publish_queue: Arc::new(BoundedQueue::new(queue_size)),
            running: AtomicBool::new(false),
            workers_live: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown_requested: Signal::new(),
            stopped: Signal::new(),
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

    /// Marks the flow as running; called at the top of `run()`.
    pub(crate) fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
    }

    /// Requests shutdown and blocks until `run()` has completed the
    /// protocol. Idempotent and safe from any thread.
    pub(crate) fn shutdown_and_wait(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_requested.set();
        if self.started.load(Ordering::SeqCst) {
            self.stopped.wait();
        }
    }

    /// Blocks until an external `shutdown()` fires.
    pub(crate) fn wait_for_shutdown(&self) {
        self.shutdown_requested.wait();
        self.running.store(false, Ordering::SeqCst);
    }

    // ----- back-pressure gate -----

    pub(crate) fn gate(&self, queue: &BoundedQueue<QueueItem>) {
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
            std::thread::sleep(GATE_POLL_INTERVAL);
        }
    }

    // ----- worker pools -----

    pub(crate) fn spawn_domain_workers(engine: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..engine.thread_pool.max_workers)
            .map(|i| {
                let engine = engine.clone();
                std::thread::Builder::new()
                    .name(format!("domain-worker-{i}"))
                    .spawn(move || engine.domain_worker())
                    .expect("failed to spawn domain worker")
            })
            .collect()
    }

    pub(crate) fn spawn_publish_workers(
        engine: &Arc<Self>,
        publisher: Arc<dyn Publisher>,
    ) -> Vec<JoinHandle<()>> {
        (0..engine.thread_pool.max_workers)
            .map(|i| {
                let engine = engine.clone();
                let publisher = publisher.clone();
                std::thread::Builder::new()
                    .name(format!("publish-worker-{i}"))
                    .spawn(move || engine.publish_worker(publisher.as_ref()))
                    .expect("failed to spawn publish worker")
            })
            .collect()
    }

    fn domain_worker(&self) {
        while self.workers_live() {
            let Some((message, dest_topic)) = self.domain_queue.get(DEQUEUE_TIMEOUT) else {
                continue;
            };

            let source_topic = message.topic.clone();
            let result = self.processor.process(message).map(|processed| {
                self.gate(&self.publish_queue);
                self.publish_queue.put((processed, dest_topic));
            });
            if let Err(e) = result {
                error!(topic = %source_topic, error = %e, "Error in domain processing");
                self.metrics.record_source_error(&source_topic);
            }
            self.domain_queue.task_done();
        }
    }

    fn publish_worker(&self, publisher: &dyn Publisher) {
        while self.workers_live() {
            let Some((message, dest_topic)) = self.publish_queue.get(DEQUEUE_TIMEOUT) else {
                continue;
            };

            let size = message.size();
            match publisher.publish(message, &dest_topic) {
                Ok(()) => self.metrics.record_destination_message(&dest_topic, size),
                Err(e) => {
                    error!(topic = %dest_topic, error = %e, "Error publishing message");
                    self.metrics.record_destination_error(&dest_topic);
                }
            }
            self.publish_queue.task_done();
        }
    }

    // ----- shutdown protocol -----

    /// Drains both queues, terminates the worker pools and closes the
    /// queues. Consumer tasks must already be stopped: anything enqueued
    /// after this point is lost.
    pub(crate) fn drain_and_stop(
        &self,
        domain_workers: Vec<JoinHandle<()>>,
        publish_workers: Vec<JoinHandle<()>>,
    ) {
        // Workers stay live through both joins so in-flight work drains.
        self.domain_queue.join();
        self.publish_queue.join();

        self.workers_live.store(false, Ordering::SeqCst);
        join_with_timeout(domain_workers, JOIN_TIMEOUT, "domain worker");
        join_with_timeout(publish_workers, JOIN_TIMEOUT, "publish worker");

        self.domain_queue.close();
        self.publish_queue.close();
    }

    /// Marks the shutdown protocol complete, releasing `shutdown()` callers.
    pub(crate) fn mark_stopped(&self) {
        info!("Flow shutdown complete");
        self.stopped.set();
    }
}

/// Joins each handle with a soft per-task deadline; tasks that fail to stop
/// in time are abandoned.
pub(crate) fn join_with_timeout(handles: Vec<JoinHandle<()>>, timeout: Duration, what: &str) {
    for handle in handles {
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!(task = what, timeout = ?timeout, "Task did not stop in time, abandoning");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::PassThroughProcessor;

    fn engine(max_workers: usize, queue_size: usize) -> Arc<FlowEngine> {
        Arc::new(FlowEngine::new(
            ThreadPoolConfig { max_workers, queue_size },
            BackPressureConfig::default(),
            Arc::new(PassThroughProcessor),
        ))
    }

    #[test]
    fn test_signal_set_and_wait() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = signal.clone();
            std::thread::spawn(move || signal.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        signal.set();
        waiter.join().unwrap();
        assert!(signal.is_set());
    }

    #[test]
    fn test_gate_skips_below_high_watermark() {
        let engine = engine(1, 10);
        engine.start();
        // Empty queue: the gate must return immediately.
        let start = Instant::now();
        engine.gate(&engine.publish_queue);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_gate_waits_until_low_watermark() {
        let engine = engine(1, 10);
        engine.start();
        for i in 0..9 {
            engine.publish_queue.put((Message::new("t", vec![]), format!("d{i}")));
        }
        assert!(engine.publish_queue.fill_ratio() >= 0.8);

        let gate_done = Arc::new(AtomicBool::new(false));
        let waiter = {
            let engine = engine.clone();
            let gate_done = gate_done.clone();
            std::thread::spawn(move || {
                engine.gate(&engine.publish_queue);
                gate_done.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!gate_done.load(Ordering::SeqCst));

        // Drain to the low watermark; the gate must release.
        while engine.publish_queue.fill_ratio() > 0.5 {
            engine.publish_queue.get(Duration::from_millis(10));
        }
        waiter.join().unwrap();
        assert!(gate_done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_gate_releases_on_shutdown() {
        let engine = engine(1, 10);
        engine.start();
        for i in 0..10 {
            engine.publish_queue.put((Message::new("t", vec![]), format!("d{i}")));
        }

        let waiter = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.gate(&engine.publish_queue))
        };

        std::thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        engine.running.store(false, Ordering::SeqCst);
        waiter.join().unwrap();
    }

    #[test]
    fn test_workers_drain_queues_during_shutdown() {
        use crate::adapters::MockPublisher;

        let engine = engine(2, 50);
        engine.start();
        let publisher = Arc::new(MockPublisher::new());

        let domain = FlowEngine::spawn_domain_workers(&engine);
        let publish = FlowEngine::spawn_publish_workers(&engine, publisher.clone());

        for i in 0..20 {
            engine
                .domain_queue
                .put((Message::new("in", format!("{i}").into_bytes()), "out".to_string()));
        }

        // Stop intake and run the drain protocol immediately; queued items
        // must still come out the other side.
        engine.running.store(false, Ordering::SeqCst);
        engine.drain_and_stop(domain, publish);

        assert_eq!(publisher.publish_count(), 20);
        assert_eq!(engine.domain_queue.len(), 0);
        assert_eq!(engine.publish_queue.len(), 0);
    }
}
