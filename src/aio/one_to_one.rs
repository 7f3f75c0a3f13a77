//! Async one-to-one flow: parallel topic pairs over one source and publisher.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::{AsyncPublisher, AsyncSource};
use crate::config::{BackPressureConfig, ThreadPoolConfig};
use crate::error::{FlowError, Result};
use crate::flow::FlowStats;
use crate::metrics::MetricsRegistry;
use crate::processor::AsyncProcessor;
use crate::routing::TopicMap;

use super::base::{join_with_timeout, AsyncFlowEngine, JOIN_TIMEOUT};
use super::{consume_source, AsyncFlow};

pub struct OneToOneFlow {
    engine: Arc<AsyncFlowEngine>,
    source: Arc<dyn AsyncSource>,
    destination: Arc<dyn AsyncPublisher>,
    topic_map: TopicMap,
}

impl OneToOneFlow {
    pub fn new(
        source: Arc<dyn AsyncSource>,
        destination: Arc<dyn AsyncPublisher>,
        topic_map: TopicMap,
        thread_pool: ThreadPoolConfig,
        back_pressure: BackPressureConfig,
        processor: Arc<dyn AsyncProcessor>,
    ) -> Self {
        Self {
            engine: Arc::new(AsyncFlowEngine::new(thread_pool, back_pressure, processor)),
            source,
            destination,
            topic_map,
        }
    }
}

#[async_trait]
impl AsyncFlow for OneToOneFlow {
    async fn run(&self) -> Result<()> {
        self.engine.start();

        let connect = async {
            self.source.connect().await.map_err(FlowError::Connection)?;
            self.source
                .subscribe(self.topic_map.source_topics())
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
            let topic_map = self.topic_map.clone();
            tokio::spawn(async move {
                consume_source(&engine, source.as_ref(), move |message| {
                    topic_map.resolve(&message.topic).map(str::to_string)
                })
                .await
            })
        };

        info!(mappings = self.topic_map.len(), "Async one-to-one flow started");

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

        info!("Async one-to-one flow stopped");
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
