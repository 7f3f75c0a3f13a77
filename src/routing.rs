//! Destination routing shared by the threaded and async flow variants.
//!
//! Routing runs in the consumer stage so that `(message, dest_topic)` pairs
//! are complete before they enter the domain queue; the domain and publish
//! stages stay routing-oblivious across all three topologies.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::config::TopicMapping;
use crate::error::FlowError;
use crate::message::Message;

/// Topic used when a fan resolver cannot determine a destination.
pub const DEFAULT_TOPIC: &str = "default";

/// Per-message destination rule for fan mode.
#[derive(Debug, Clone)]
pub enum DestinationResolver {
    /// Destination is the value of a message header.
    Header { key: String },
    /// Destination is a top-level string value in a UTF-8 JSON payload.
    PayloadKey { key: String },
}

impl DestinationResolver {
    /// Builds a resolver from the raw `{type, key}` configuration pair.
    pub fn from_config(resolver_type: &str, key: &str) -> Result<Self, FlowError> {
        match resolver_type {
            "header" => Ok(Self::Header { key: key.to_string() }),
            "payload_key" => Ok(Self::PayloadKey { key: key.to_string() }),
            other => Err(FlowError::Config(format!(
                "unknown destination resolver type: {other}"
            ))),
        }
    }

    /// Resolves the destination topic for a message.
    ///
    /// Missing headers, payloads that are not valid JSON objects, missing
    /// keys and non-string values all fall back to [`DEFAULT_TOPIC`].
    pub fn resolve(&self, message: &Message) -> String {
        match self {
            Self::Header { key } => message
                .header(key)
                .unwrap_or(DEFAULT_TOPIC)
                .to_string(),
            Self::PayloadKey { key } => match serde_json::from_slice::<Value>(&message.payload) {
                Ok(Value::Object(map)) => match map.get(key) {
                    Some(Value::String(topic)) => topic.clone(),
                    _ => DEFAULT_TOPIC.to_string(),
                },
                Ok(_) => DEFAULT_TOPIC.to_string(),
                Err(e) => {
                    debug!(topic = %message.topic, error = %e, "Payload is not routable JSON, using default");
                    DEFAULT_TOPIC.to_string()
                }
            },
        }
    }
}

/// Static source-topic to destination-topic map for one-to-one mode.
#[derive(Debug, Clone, Default)]
pub struct TopicMap {
    map: HashMap<String, String>,
    ordered_sources: Vec<String>,
}

impl TopicMap {
    pub fn from_mappings(mappings: &[TopicMapping]) -> Self {
        let mut map = HashMap::new();
        let mut ordered_sources = Vec::new();
        for mapping in mappings {
            if !map.contains_key(&mapping.source_topic) {
                ordered_sources.push(mapping.source_topic.clone());
            }
            map.insert(mapping.source_topic.clone(), mapping.destination_topic.clone());
        }
        Self { map, ordered_sources }
    }

    /// Destination topic for a source topic, if mapped.
    pub fn resolve(&self, source_topic: &str) -> Option<&str> {
        self.map.get(source_topic).map(String::as_str)
    }

    /// Distinct source topics in configuration order, for `subscribe`.
    pub fn source_topics(&self) -> &[String] {
        &self.ordered_sources
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
