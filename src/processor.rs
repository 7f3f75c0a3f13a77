//! Message transform stage.
//!
//! A processor is the user-supplied hook between the consume and publish
//! stages. It must tolerate being called concurrently from `max_workers`
//! worker threads; operators with a non-thread-safe transform configure
//! `max_workers = 1`. A processor error is a per-message error: the message
//! is dropped and counted, the worker continues.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::FlowError;
use crate::message::Message;

/// Synchronous transform used by the threaded flows.
pub trait Processor: Send + Sync {
    fn process(&self, message: Message) -> anyhow::Result<Message>;
}

/// Cooperative transform used by the async flows.
#[async_trait]
pub trait AsyncProcessor: Send + Sync {
    async fn process(&self, message: Message) -> anyhow::Result<Message>;
}

/// Default transform: returns the message unchanged.
#[derive(Debug, Default)]
pub struct PassThroughProcessor;

impl Processor for PassThroughProcessor {
    fn process(&self, message: Message) -> anyhow::Result<Message> {
        Ok(message)
    }
}

/// Default async transform: returns the message unchanged.
#[derive(Debug, Default)]
pub struct AsyncPassThroughProcessor;

#[async_trait]
impl AsyncProcessor for AsyncPassThroughProcessor {
    async fn process(&self, message: Message) -> anyhow::Result<Message> {
        Ok(message)
    }
}

/// Stamps each message with the time it passed the domain stage.
#[derive(Debug, Default)]
pub struct HeaderStampProcessor;

impl Processor for HeaderStampProcessor {
    fn process(&self, mut message: Message) -> anyhow::Result<Message> {
        message
            .headers
            .insert("processed_at".to_string(), Utc::now().to_rfc3339());
        Ok(message)
    }
}

/// Marks JSON payloads as enriched; non-JSON payloads get an error header.
#[derive(Debug, Default)]
pub struct JsonEnrichProcessor;

impl Processor for JsonEnrichProcessor {
    fn process(&self, mut message: Message) -> anyhow::Result<Message> {
        match serde_json::from_slice::<serde_json::Value>(&message.payload) {
            Ok(mut payload) => {
                if let Some(map) = payload.as_object_mut() {
                    map.insert("enriched".to_string(), serde_json::Value::Bool(true));
                    message.payload = serde_json::to_vec(&payload)?;
                }
            }
            Err(e) => {
                message
                    .headers
                    .insert("enrichment_error".to_string(), e.to_string());
            }
        }
        Ok(message)
    }
}

type ProcessorFactory = Box<dyn Fn() -> Arc<dyn Processor> + Send + Sync>;

/// Compile-time-seeded registry resolving `processor_class` names.
///
/// The built-in names are `passthrough`, `header_stamp` and `json_enrich`;
/// embedding applications register additional transforms before the flow is
/// built.
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("passthrough", || Arc::new(PassThroughProcessor));
        registry.register("header_stamp", || Arc::new(HeaderStampProcessor));
        registry.register("json_enrich", || Arc::new(JsonEnrichProcessor));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Processor> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiates the named processor; `None` yields the pass-through.
    pub fn create(&self, name: Option<&str>) -> Result<Arc<dyn Processor>, FlowError> {
        match name {
            None => Ok(Arc::new(PassThroughProcessor)),
            Some(name) => self
                .factories
                .get(name)
                .map(|factory| factory())
                .ok_or_else(|| FlowError::UnknownProcessor(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_identity() {
        let message = Message::new("t", b"payload".to_vec()).with_header("a", "b");
        let out = PassThroughProcessor.process(message.clone()).unwrap();
        assert_eq!(out, message);
    }

    #[test]
    fn test_header_stamp_adds_header() {
        let out = HeaderStampProcessor
            .process(Message::new("t", b"x".to_vec()))
            .unwrap();
        assert!(out.header("processed_at").is_some());
    }

    #[test]
    fn test_json_enrich_marks_objects() {
        let out = JsonEnrichProcessor
            .process(Message::new("t", br#"{"v":1}"#.to_vec()))
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&out.payload).unwrap();
        assert_eq!(payload["enriched"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_json_enrich_flags_bad_payload() {
        let out = JsonEnrichProcessor
            .process(Message::new("t", b"not json".to_vec()))
            .unwrap();
        assert!(out.header("enrichment_error").is_some());
        assert_eq!(out.payload, b"not json".to_vec());
    }

    #[test]
    fn test_registry_resolution() {
        let registry = ProcessorRegistry::with_builtins();
        assert!(registry.create(None).is_ok());
        assert!(registry.create(Some("passthrough")).is_ok());
        assert!(registry.create(Some("header_stamp")).is_ok());
        assert!(matches!(
            registry.create(Some("nope")),
            Err(FlowError::UnknownProcessor(_))
        ));
    }

    #[test]
    fn test_registry_custom_processor() {
        let mut registry = ProcessorRegistry::with_builtins();
        registry.register("stamp", || Arc::new(HeaderStampProcessor));
        let processor = registry.create(Some("stamp")).unwrap();
        let out = processor.process(Message::new("t", b"x".to_vec())).unwrap();
        assert!(out.header("processed_at").is_some());
    }
}
