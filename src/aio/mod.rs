//! Cooperative flow variant for async adapters.
//!
//! Twin of the threaded [`crate::flow`] module: the same three topologies,
//! queue shape, metrics and shutdown protocol, but every blocking point is a
//! cooperative suspension on the tokio scheduler. Used with the async adapter
//! contract family only; the two families are never mixed in one flow.

mod base;
mod fan;
mod funnel;
mod one_to_one;

pub use base::AsyncFlowEngine;
pub use fan::FanFlow;
pub use funnel::{FunnelFlow, FunnelSource};
pub use one_to_one::OneToOneFlow;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::adapters::AsyncSource;
use crate::error::Result;
use crate::flow::FlowStats;
use crate::message::Message;
use crate::metrics::MetricsRegistry;

/// A running async topology instance.
#[async_trait]
pub trait AsyncFlow: Send + Sync {
    /// Connects the adapters, starts the pipeline and suspends until
    /// `shutdown()` has completed.
    async fn run(&self) -> Result<()>;

    /// Requests shutdown and waits for the protocol to finish. Idempotent.
    async fn shutdown(&self);

    fn metrics(&self) -> Arc<MetricsRegistry>;

    fn stats(&self) -> FlowStats;
}

/// Shared consumer loop, suspending twin of `flow::consume_source`.
pub(crate) async fn consume_source<F>(
    engine: &base::AsyncFlowEngine,
    source: &dyn AsyncSource,
    route: F,
) where
    F: Fn(&Message) -> Option<String>,
{
    loop {
        if !engine.running() {
            break;
        }
        match source.next_message().await {
            Ok(Some(message)) => {
                if !engine.running() {
                    break;
                }
                let Some(dest_topic) = route(&message) else {
                    debug!(topic = %message.topic, "No mapping for topic, skipping");
                    continue;
                };

                engine
                    .metrics
                    .record_source_message(&message.topic, message.size());
                engine.gate(&engine.domain_queue).await;

                let source_topic = message.topic.clone();
                if !engine.domain_queue.put((message, dest_topic)).await {
                    break;
                }

                // The commit boundary: the message is now safely handed off.
                if let Err(e) = source.commit(None).await {
                    error!(topic = %source_topic, error = %e, "Error committing message");
                    engine.metrics.record_source_error(&source_topic);
                }
            }
            Ok(None) => {
                info!("Source stream ended");
                break;
            }
            Err(e) => {
                error!(error = %e, "Error consuming from source");
                break;
            }
        }
    }
}
