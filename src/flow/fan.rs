//! Fan flow: one source, destinations resolved per message.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{Publisher, Source};
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::error::{FlowError, Result};
use crate::metrics::MetricsRegistry;
use crate::processor::Processor;
use crate::routing::DestinationResolver;

use super::base::{join_with_timeout, FlowEngine, FlowStats, JOIN_TIMEOUT};
use super::{consume_source, Flow};

/// Reads one topic, routes each message to a destination topic picked from
/// its headers or JSON payload.
pub struct FanFlow {
    engine: Arc<FlowEngine>,
    source: Arc<dyn Source>,
    source_topic: String,
    destination: Arc<dyn Publisher>,
    resolver: DestinationResolver,
}

impl FanFlow {
    pub fn new(
        source: Arc<dyn Source>,
        source_topic: impl Into<String>,
        destination: Arc<dyn Publisher>,
        resolver: DestinationResolver,
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn Processor>,
    ) -> Self {
        Self {
            engine: Arc::new(FlowEngine::new(thread_pool, back_pressure, processor)),
            source,
            source_topic: source_topic.into(),
            destination,
            resolver,
        }
    }
}

impl Flow for FanFlow {
    fn run(&self) -> Result<()> {
        self.engine.start();

        let connect = || -> Result<()> {
            self.source.connect().map_err(FlowError::Connection)?;
            self.source
                .subscribe(std::slice::from_ref(&self.source_topic))
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
            let resolver = self.resolver.clone();
            std::thread::Builder::new()
                .name("consumer".to_string())
                .spawn(move || {
                    consume_source(&engine, source.as_ref(), |message| {
                        Some(resolver.resolve(message))
                    })
                })
                .expect("failed to spawn consumer")
        };

        info!(source_topic = %self.source_topic, "Fan flow started");

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

        info!("Fan flow stopped");
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
