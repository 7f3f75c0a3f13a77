//! Flowbridge: configurable in-process bridge between pub/sub systems.
//!
//! Messages are pulled from one or more sources, run through a transform and
//! published to one or more destinations under one of three topology modes:
//!
//! - **funnel** — many sources into one destination topic
//! - **fan** — one source, destination topic resolved per message from a
//!   header or a JSON payload key
//! - **one-to-one** — many topics over one source, routed by a static map
//!
//! Delivery is at-least-once from source to engine (commit after hand-off to
//! the domain queue) and at-most-once from engine to destination. Ordering is
//! preserved end to end only with a single worker per stage.

pub mod adapters;
pub mod aio;
pub mod config;
pub mod error;
pub mod flow;
pub mod message;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod routing;

pub use config::{FlowConfig, FlowMode};
pub use error::{FlowError, Result};
pub use flow::{FanFlow, Flow, FlowStats, FunnelFlow, OneToOneFlow};
pub use message::{Message, Offset};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use processor::{PassThroughProcessor, Processor, ProcessorRegistry};

use std::sync::Arc;

use adapters::AdapterRegistry;
use flow::FunnelSource;
use routing::{DestinationResolver, TopicMap};

/// Builds the flow described by a validated configuration.
///
/// Adapters and processors are resolved through the given registries; the
/// returned flow is ready for `run()`.
pub fn build_flow(
    config: &FlowConfig,
    adapters: &AdapterRegistry,
    processors: &ProcessorRegistry,
) -> Result<Arc<dyn Flow>> {
    config.validate()?;
    let processor = processors.create(config.processor_class.as_deref())?;
    let thread_pool = config.thread_pool.clone();
    let back_pressure = config.back_pressure.clone();

    match config.mode {
        FlowMode::Funnel => {
            let funnel = config
                .funnel
                .as_ref()
                .ok_or_else(|| FlowError::Config("funnel block is missing".to_string()))?;

            let mut sources = Vec::with_capacity(funnel.sources.len());
            for system in &funnel.sources {
                sources.push(FunnelSource {
                    source: adapters.create_source(&system.kind, &system.connection)?,
                    topics: system.topics.clone().unwrap_or_default(),
                });
            }
            let destination =
                adapters.create_publisher(&funnel.destination.kind, &funnel.destination.connection)?;

            Ok(Arc::new(FunnelFlow::new(
                sources,
                destination,
                funnel.destination_topic.clone(),
                thread_pool,
                back_pressure,
                processor,
            )))
        }
        FlowMode::Fan => {
            let fan = config
                .fan
                .as_ref()
                .ok_or_else(|| FlowError::Config("fan block is missing".to_string()))?;

            let source = adapters.create_source(&fan.source.kind, &fan.source.connection)?;
            let destination =
                adapters.create_publisher(&fan.destination.kind, &fan.destination.connection)?;
            let resolver = DestinationResolver::from_config(
                &fan.destination_resolver.kind,
                &fan.destination_resolver.key,
            )?;

            Ok(Arc::new(FanFlow::new(
                source,
                fan.source_topic.clone(),
                destination,
                resolver,
                thread_pool,
                back_pressure,
                processor,
            )))
        }
        FlowMode::OneToOne => {
            let one_to_one = config
                .one_to_one
                .as_ref()
                .ok_or_else(|| FlowError::Config("one_to_one block is missing".to_string()))?;

            let source =
                adapters.create_source(&one_to_one.source.kind, &one_to_one.source.connection)?;
            let destination = adapters
                .create_publisher(&one_to_one.destination.kind, &one_to_one.destination.connection)?;
            let topic_map = TopicMap::from_mappings(&one_to_one.mappings);

            Ok(Arc::new(OneToOneFlow::new(
                source,
                destination,
                topic_map,
                thread_pool,
                back_pressure,
                processor,
            )))
        }
    }
}
