//! Threaded flow topologies.
//!
//! Every topology is the same three-stage pipeline: consumer task(s) fill the
//! domain queue, domain workers run the transform, publish workers hand
//! messages to the destination adapter. Routing happens in the consumer, so
//! the later stages never care which topology they serve.

mod base;
mod fan;
mod funnel;
mod one_to_one;

pub use base::{FlowEngine, FlowStats};
pub use fan::FanFlow;
pub use funnel::{FunnelFlow, FunnelSource};
pub use one_to_one::OneToOneFlow;

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::adapters::Source;
use crate::error::Result;
use crate::message::Message;
use crate::metrics::MetricsRegistry;

/// A running topology instance.
pub trait Flow: Send + Sync {
    /// Connects the adapters, starts the pipeline and blocks until
    /// `shutdown()` has completed.
    fn run(&self) -> Result<()>;

    /// Requests shutdown and waits for the protocol to finish. Idempotent
    /// and safe from any thread, including a signal handler's.
    fn shutdown(&self);

    fn metrics(&self) -> Arc<MetricsRegistry>;

    fn stats(&self) -> FlowStats;
}

/// Shared consumer loop: pull, route, record, gate, enqueue, commit.
///
/// `route` returns the destination topic for a message, or `None` to skip it
/// silently (unmapped topics in one-to-one mode). Stream errors end the
/// loop; other consumers keep running.
pub(crate) fn consume_source<F>(engine: &base::FlowEngine, source: &dyn Source, route: F)
where
    F: Fn(&Message) -> Option<String>,
{
    loop {
        if !engine.running() {
            break;
        }
        match source.next_message() {
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
                engine.gate(&engine.domain_queue);

                let source_topic = message.topic.clone();
                if !engine.domain_queue.put((message, dest_topic)) {
                    break;
                }

                // The commit boundary: the message is now safely handed off.
                if let Err(e) = source.commit(None) {
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
