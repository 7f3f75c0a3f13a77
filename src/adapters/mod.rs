//! Broker adapter contracts and the adapter registry.
//!
//! The engine only ever sees the abstract `Source` / `Publisher` operations;
//! wire protocols, auth and serialization live in adapter crates. Two
//! contract families exist: the blocking one for the threaded flows and the
//! suspending one for the async variant. A flow instance never mixes the two.

mod mock;

pub use mock::{AsyncMockPublisher, AsyncMockSource, MockPublisher, MockSource};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionParams;
use crate::error::FlowError;
use crate::message::Message;

// ============================================
// BLOCKING CONTRACTS
// ============================================

/// Pull-style message source for the threaded flows.
///
/// `next_message` is the iterator rendition of an infinite consume stream:
/// it blocks until a message is available and returns `Ok(None)` once the
/// source has been closed. Implementations must tolerate `publish`-side
/// concurrency rules described in the crate docs; sources themselves are
/// driven by exactly one consumer task.
pub trait Source: Send + Sync {
    fn connect(&self) -> anyhow::Result<()>;

    fn subscribe(&self, topics: &[String]) -> anyhow::Result<()>;

    /// Blocks until the next message arrives; `Ok(None)` when closed.
    fn next_message(&self) -> anyhow::Result<Option<Message>>;

    /// Advances the delivery cursor. `None` commits through the last message
    /// this source delivered; `Some` pins an explicit message. Granularity is
    /// broker-specific and may be a no-op.
    fn commit(&self, message: Option<&Message>) -> anyhow::Result<()>;

    fn close(&self) -> anyhow::Result<()>;
}

/// Push-style destination for the threaded flows.
pub trait Publisher: Send + Sync {
    fn connect(&self) -> anyhow::Result<()>;

    fn publish(&self, message: Message, topic: &str) -> anyhow::Result<()>;

    fn flush(&self) -> anyhow::Result<()>;

    fn close(&self) -> anyhow::Result<()>;
}

// ============================================
// ASYNC CONTRACTS
// ============================================

/// Suspending twin of [`Source`], used only by the async flow variant.
#[async_trait]
pub trait AsyncSource: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;

    async fn subscribe(&self, topics: &[String]) -> anyhow::Result<()>;

    async fn next_message(&self) -> anyhow::Result<Option<Message>>;

    async fn commit(&self, message: Option<&Message>) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Suspending twin of [`Publisher`], used only by the async flow variant.
#[async_trait]
pub trait AsyncPublisher: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;

    async fn publish(&self, message: Message, topic: &str) -> anyhow::Result<()>;

    async fn flush(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

// ============================================
// ADAPTER REGISTRY
// ============================================

type SourceFactory = Box<dyn Fn(&ConnectionParams) -> anyhow::Result<Arc<dyn Source>> + Send + Sync>;
type PublisherFactory =
    Box<dyn Fn(&ConnectionParams) -> anyhow::Result<Arc<dyn Publisher>> + Send + Sync>;

/// Maps adapter type names to source/publisher factories.
///
/// Pre-seeded with the `mock` backend; broker adapter crates register their
/// own types before the flow is built. Connection blocks are passed through
/// opaque, exactly as they appear in the configuration file.
pub struct AdapterRegistry {
    sources: HashMap<String, SourceFactory>,
    publishers: HashMap<String, PublisherFactory>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            sources: HashMap::new(),
            publishers: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_source("mock", |params| Ok(Arc::new(MockSource::from_params(params))));
        registry.register_publisher("mock", |params| {
            Ok(Arc::new(MockPublisher::from_params(params)))
        });
        registry
    }

    pub fn register_source<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectionParams) -> anyhow::Result<Arc<dyn Source>> + Send + Sync + 'static,
    {
        self.sources.insert(kind.into(), Box::new(factory));
    }

    pub fn register_publisher<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectionParams) -> anyhow::Result<Arc<dyn Publisher>> + Send + Sync + 'static,
    {
        self.publishers.insert(kind.into(), Box::new(factory));
    }

    pub fn create_source(
        &self,
        kind: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn Source>, FlowError> {
        let factory = self
            .sources
            .get(kind)
            .ok_or_else(|| FlowError::UnknownAdapter(kind.to_string()))?;
        factory(params).map_err(FlowError::Adapter)
    }

    pub fn create_publisher(
        &self,
        kind: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn Publisher>, FlowError> {
        let factory = self
            .publishers
            .get(kind)
            .ok_or_else(|| FlowError::UnknownAdapter(kind.to_string()))?;
        factory(params).map_err(FlowError::Adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creates_mock_adapters() {
        let registry = AdapterRegistry::with_builtins();
        let params = ConnectionParams::new();
        assert!(registry.create_source("mock", &params).is_ok());
        assert!(registry.create_publisher("mock", &params).is_ok());
    }

    #[test]
    fn test_registry_rejects_unknown_type() {
        let registry = AdapterRegistry::with_builtins();
        let params = ConnectionParams::new();
        assert!(matches!(
            registry.create_source("kafka", &params),
            Err(FlowError::UnknownAdapter(_))
        ));
        assert!(matches!(
            registry.create_publisher("pulsar", &params),
            Err(FlowError::UnknownAdapter(_))
        ));
    }
}
