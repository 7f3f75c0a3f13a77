//! One-to-one flow: parallel topic pairs over a single source and publisher.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{Publisher, Source};
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::error::{FlowError, Result};
use crate::metrics::MetricsRegistry;
use crate::processor::Processor;
use crate::routing::TopicMap;

use super::base::{join_with_timeout, FlowEngine, FlowStats, JOIN_TIMEOUT};
use super::{consume_source, Flow};

/// Multiplexes many topics over one source and routes each by a static
/// topic map; messages on unmapped topics are skipped.
pub struct OneToOneFlow {
    engine: Arc<FlowEngine>,
    source: Arc<dyn Source>,
    destination: Arc<dyn Publisher>,
    topic_map: TopicMap,
}

impl OneToOneFlow {
    pub fn new(
        source: Arc<dyn Source>,
        destination: Arc<dyn Publisher>,
        topic_map: TopicMap,
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn Processor>,
    ) -> Self {
        Self {
            engine: Arc::new(FlowEngine::new(thread_pool, back_pressure, processor)),
            source,
            destination,
            topic_map,
        }
    }
}

impl Flow for OneToOneFlow {
    fn run(&self) -> Result<()> {
        self.engine.start();

        let connect = || -> Result<()> {
            self.source.connect().map_err(FlowError::Connection)?;
            self.source
                .subscribe(self.topic_map.source_topics())
                .map_err(FlowError::Connection)?;
            self.destination.connect().map_err(FlowError::Connection)
        };
        if let Err(e) = connect() {
            self.engine.mark_stopped();
            return Err(e);
        }

        let domain_workers = FlowEngine::spawn_domain_workers(&self.engine);
        let publish_workers = FlowEngine::spawn_publish_workers(&self.engine, self.destination.clone());

        let consumer = {
            let engine = self.engine.clone();
            let source = self.source.clone();
            let topic_map = self.topic_map.clone();
            std::thread::Builder::new()
                .name("consumer".to_string())
                .spawn(move || {
                    consume_source(&engine, source.as_ref(), |message| {
                        topic_map.resolve(&message.topic).map(str::to_string)
                    })
                })
                .expect("failed to spawn consumer")
        };

        info!(mappings = self.topic_map.len(), "One-to-one flow started");

        self.engine.wait_for_shutdown();

        join_with_timeout(vec![consumer], JOIN_TIMEOUT, "consumer");
        self.engine
            .drain_and_stop(domain_workers, publish_workers);

        if let Err(e) = self.destination.flush() {
            warn!(error = %e, "Error flushing destination");
        }
        if let Err(e) = self.destination.close() {
            warn!(error = %e, "Error closing destination");
        }
        if let Err(e) = self.source.close() {
            warn!(error = %e, "Error closing source");
        }

        info!("One-to-one flow stopped");
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
