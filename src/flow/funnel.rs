//! Funnel flow: many sources, one destination topic.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{Publisher, Source};
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::error::{FlowError, Result};
use crate::metrics::MetricsRegistry;
use crate::processor::Processor;

use super::base::{join_with_timeout, FlowEngine, FlowStats, JOIN_TIMEOUT};
use super::{consume_source, Flow};

/// One funnel input: a source plus the topics it subscribes to.
pub struct FunnelSource {
    pub source: Arc<dyn Source>,
    pub topics: Vec<String>,
}

/// Reads from every source concurrently, publishes everything to a single
/// destination topic.
pub struct FunnelFlow {
    engine: Arc<FlowEngine>,
    sources: Vec<FunnelSource>,
    destination: Arc<dyn Publisher>,
    destination_topic: String,
}

impl FunnelFlow {
    pub fn new(
        sources: Vec<FunnelSource>,
        destination: Arc<dyn Publisher>,
        destination_topic: impl Into<String>,
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn Processor>,
    ) -> Self {
        Self {
            engine: Arc::new(FlowEngine::new(thread_pool, back_pressure, processor)),
            sources,
            destination,
            destination_topic: destination_topic.into(),
        }
    }
}

impl Flow for FunnelFlow {
    fn run(&self) -> Result<()> {
        self.engine.start();

        let connect = || -> Result<()> {
            for input in &self.sources {
                input.source.connect().map_err(FlowError::Connection)?;
                if !input.topics.is_empty() {
                    input
                        .source
                        .subscribe(&input.topics)
                        .map_err(FlowError::Connection)?;
                }
            }
            self.destination.connect().map_err(FlowError::Connection)
        };
        if let Err(e) = connect() {
            self.engine.mark_stopped();
            return Err(e);
        }

        let domain_workers = FlowEngine::spawn_domain_workers(&self.engine);
        let publish_workers = FlowEngine::spawn_publish_workers(&self.engine, self.destination.clone());

        let consumers: Vec<_> = self
            .sources
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let engine = self.engine.clone();
                let source = input.source.clone();
                let dest_topic = self.destination_topic.clone();
                std::thread::Builder::new()
                    .name(format!("consumer-{i}"))
                    .spawn(move || {
                        consume_source(&engine, source.as_ref(), |_| Some(dest_topic.clone()))
                    })
                    .expect("failed to spawn consumer")
            })
            .collect();

        info!(sources = self.sources.len(), "Funnel flow started");

        self.engine.wait_for_shutdown();

        join_with_timeout(consumers, JOIN_TIMEOUT, "consumer");
        self.engine
            .drain_and_stop(domain_workers, publish_workers);

        if let Err(e) = self.destination.flush() {
            warn!(error = %e, "Error flushing destination");
        }
        if let Err(e) = self.destination.close() {
            warn!(error = %e, "Error closing destination");
        }
        for input in &self.sources {
            if let Err(e) = input.source.close() {
                warn!(error = %e, "Error closing source");
            }
        }

        info!("Funnel flow stopped");
        self.engine.mark_stopped();
        Ok(())
    }

    fn shutdown(&self) {
        self.engine.shutdown_and_wait();
    }

    fn metrics(&self) -> Arc<MetricsRegistry> {
        self.engine.metrics()
    }

    fn stats(&self) -> FlowStats {
        self.engine.stats()
    }
}
