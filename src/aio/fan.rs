//! Async fan flow: one source, destinations resolved per message.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::{AsyncPublisher, AsyncSource};
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::error::{FlowError, Result};
use crate::flow::FlowStats;
use crate::metrics::MetricsRegistry;
use crate::processor::AsyncProcessor;
use crate::routing::DestinationResolver;

use super::base::{join_with_timeout, AsyncFlowEngine, JOIN_TIMEOUT};
use super::{consume_source, AsyncFlow};

pub struct FanFlow {
    engine: Arc<AsyncFlowEngine>,
    source: Arc<dyn AsyncSource>,
    source_topic: String,
    destination: Arc<dyn AsyncPublisher>,
    resolver: DestinationResolver,
}

impl FanFlow {
    pub fn new(
        source: Arc<dyn AsyncSource>,
        source_topic: impl Into<String>,
        destination: Arc<dyn AsyncPublisher>,
        resolver: DestinationResolver,
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn AsyncProcessor>,
    ) -> Self {
        Self {
            engine: Arc::new(AsyncFlowEngine::new(thread_pool, back_pressure, processor)),
            source,
            source_topic: source_topic.into(),
            destination,
            resolver,
        }
    }
}

#[async_trait]
impl AsyncFlow for FanFlow {
    async fn run(&self) -> Result<()> {
        self.engine.start();

        let connect = async {
            self.source.connect().await.map_err(FlowError::Connection)?;
            self.source
                .subscribe(std::slice::from_ref(&self.source_topic))
                .await
                .map_err(FlowError::Connection)?;
            self.destination
                .connect()
                .await
                .map_err(FlowError::Connection)
        };
        if let Err(e) = connect.await {
            self.engine.mark_stopped();
            return Err(e);
        }

        let domain_workers = AsyncFlowEngine::spawn_domain_workers(&self.engine);
        let publish_workers = AsyncFlowEngine::spawn_publish_workers(&self.engine, self.destination.clone());

        let consumer = {
            let engine = self.engine.clone();
            let source = self.source.clone();
            let resolver = self.resolver.clone();
            tokio::spawn(async move {
                consume_source(&engine, source.as_ref(), move |message| {
                    Some(resolver.resolve(message))
                })
                .await
            })
        };

        info!(source_topic = %self.source_topic, "Async fan flow started");

        self.engine.wait_for_shutdown().await;

        join_with_timeout(vec![consumer], JOIN_TIMEOUT, "consumer").await;
        self.engine
            .drain_and_stop(domain_workers, publish_workers)
            .await;

        if let Err(e) = self.destination.flush().await {
            warn!(error = %e, "Error flushing destination");
        }
        if let Err(e) = self.destination.close().await {
            warn!(error = %e, "Error closing destination");
        }
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Error closing source");
        }

        info!("Async fan flow stopped");
        self.engine.mark_stopped();
        Ok(())
    }

    async fn shutdown(&self) {
        self.engine.shutdown_and_wait().await;
    }

    fn metrics(&self) -> Arc<MetricsRegistry> {
        self.engine.metrics()
    }

    fn stats(&self) -> FlowStats {
        self.engine.stats()
    }
}
