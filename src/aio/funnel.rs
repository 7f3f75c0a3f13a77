//! Async funnel flow: many sources, one destination topic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::{AsyncPublisher, AsyncSource};
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::error::{FlowError, Result};
use crate::flow::FlowStats;
use crate::metrics::MetricsRegistry;
use crate::processor::AsyncProcessor;

use super::base::{join_with_timeout, AsyncFlowEngine, JOIN_TIMEOUT};
use super::{consume_source, AsyncFlow};

/// One funnel input: a source plus the topics it subscribes to.
pub struct FunnelSource {
    pub source: Arc<dyn AsyncSource>,
    pub topics: Vec<String>,
}

pub struct FunnelFlow {
    engine: Arc<AsyncFlowEngine>,
    sources: Vec<FunnelSource>,
    destination: Arc<dyn AsyncPublisher>,
    destination_topic: String,
}

impl FunnelFlow {
    pub fn new(
        sources: Vec<FunnelSource>,
        destination: Arc<dyn AsyncPublisher>,
        destination_topic: impl Into<String>,
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn AsyncProcessor>,
    ) -> Self {
        Self {
            engine: Arc::new(AsyncFlowEngine::new(thread_pool, back_pressure, processor)),
            sources,
            destination,
            destination_topic: destination_topic.into(),
        }
    }
}

#[async_trait]
impl AsyncFlow for FunnelFlow {
    async fn run(&self) -> Result<()> {
        self.engine.start();

        let connect = async {
            for input in &self.sources {
                input.source.connect().await.map_err(FlowError::Connection)?;
                if !input.topics.is_empty() {
                    input
                        .source
                        .subscribe(&input.topics)
                        .await
                        .map_err(FlowError::Connection)?;
                }
            }
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

        let consumers: Vec<_> = self
            .sources
            .iter()
            .map(|input| {
                let engine = self.engine.clone();
                let source = input.source.clone();
                let dest_topic = self.destination_topic.clone();
                tokio::spawn(async move {
                    consume_source(&engine, source.as_ref(), |_| Some(dest_topic.clone())).await
                })
            })
            .collect();

        info!(sources = self.sources.len(), "Async funnel flow started");

        self.engine.wait_for_shutdown().await;

        join_with_timeout(consumers, JOIN_TIMEOUT, "consumer").await;
        self.engine
            .drain_and_stop(domain_workers, publish_workers)
            .await;

        if let Err(e) = self.destination.flush().await {
            warn!(error = %e, "Error flushing destination");
        }
        if let Err(e) = self.destination.close().await {
            warn!(error = %e, "Error closing destination");
        }
        for input in &self.sources {
            if let Err(e) = input.source.close().await {
                warn!(error = %e, "Error closing source");
            }
        }

        info!("Async funnel flow stopped");
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
