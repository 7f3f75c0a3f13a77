//! Per-topic metrics for monitoring message flow.
//!
//! The registry tracks source-side and destination-side counters keyed by
//! topic. It is the only mutable state shared across consumer, domain and
//! publish stages; a single mutex covers both sides so readers always see an
//! internally consistent snapshot.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Counters for a single topic.
#[derive(Debug, Clone, Default)]
pub struct TopicMetrics {
    pub message_count: u64,
    pub total_bytes: u64,
    pub error_count: u64,
    pub last_message_time: Option<DateTime<Utc>>,
}

impl TopicMetrics {
    fn record_message(&mut self, size: usize) {
        self.message_count += 1;
        self.total_bytes += size as u64;
        self.last_message_time = Some(Utc::now());
    }

    fn record_error(&mut self) {
        self.error_count += 1;
    }
}

#[derive(Default)]
struct MetricsState {
    source: HashMap<String, TopicMetrics>,
    destination: HashMap<String, TopicMetrics>,
}

/// Thread-safe metrics registry, one instance per flow.
pub struct MetricsRegistry {
    state: Mutex<MetricsState>,
    started_at: Instant,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetricsState::default()),
            started_at: Instant::now(),
        }
    }

    /// Records a message received from a source topic.
    pub fn record_source_message(&self, topic: &str, size: usize) {
        let mut state = self.state.lock();
        state
            .source
            .entry(topic.to_string())
            .or_default()
            .record_message(size);
    }

    /// Records a message delivered to a destination topic.
    pub fn record_destination_message(&self, topic: &str, size: usize) {
        let mut state = self.state.lock();
        state
            .destination
            .entry(topic.to_string())
            .or_default()
            .record_message(size);
    }

    /// Records an error attributed to a source topic.
    pub fn record_source_error(&self, topic: &str) {
        let mut state = self.state.lock();
        state
            .source
            .entry(topic.to_string())
            .or_default()
            .record_error();
    }

    /// Records an error attributed to a destination topic.
    pub fn record_destination_error(&self, topic: &str) {
        let mut state = self.state.lock();
        state
            .destination
            .entry(topic.to_string())
            .or_default()
            .record_error();
    }

    /// Deep-copy snapshot of all counters, taken under the lock.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let uptime = self.started_at.elapsed().as_secs_f64();

        let project = |metrics: &HashMap<String, TopicMetrics>| {
            metrics
                .iter()
                .map(|(topic, m)| {
                    (
                        topic.clone(),
                        TopicSnapshot {
                            message_count: m.message_count,
                            total_bytes: m.total_bytes,
                            error_count: m.error_count,
                            last_message_time: m.last_message_time,
                            rate_per_second: if uptime > 0.0 {
                                m.message_count as f64 / uptime
                            } else {
                                0.0
                            },
                        },
                    )
                })
                .collect()
        };

        MetricsSnapshot {
            uptime_seconds: uptime,
            source_metrics: project(&state.source),
            destination_metrics: project(&state.destination),
        }
    }

    /// Clears all counters and restarts the uptime clock base.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.source.clear();
        state.destination.clear();
    }
}

/// Point-in-time view of one topic's counters.
#[derive(Debug, Clone, Serialize)]
pub struct TopicSnapshot {
    pub message_count: u64,
    pub total_bytes: u64,
    pub error_count: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub rate_per_second: f64,
}

/// Point-in-time view of the whole registry; logged at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub source_metrics: HashMap<String, TopicSnapshot>,
    pub destination_metrics: HashMap<String, TopicSnapshot>,
}

impl MetricsSnapshot {
    /// Total messages counted on the source side.
    pub fn source_message_total(&self) -> u64 {
        self.source_metrics.values().map(|m| m.message_count).sum()
    }

    /// Total messages counted on the destination side.
    pub fn destination_message_total(&self) -> u64 {
        self.destination_metrics
            .values()
            .map(|m| m.message_count)
            .sum()
    }

    /// Total errors counted on the destination side.
    pub fn destination_error_total(&self) -> u64 {
        self.destination_metrics
            .values()
            .map(|m| m.error_count)
            .sum()
    }
}
