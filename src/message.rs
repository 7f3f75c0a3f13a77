//! Message record moved through the flow engine.
//!
//! A `Message` is captured by a source, handed to the engine, transferred
//! through the bounded queues and delivered to a publisher. Transforms may
//! mutate it before it reaches the publish queue; after publish it is dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Broker position of a message within its topic/partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offset {
    Numeric(i64),
    Tag(String),
}

/// A message in the pub/sub bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub topic: String,
    pub key: Option<String>,
    pub partition: Option<i32>,
    pub offset: Option<Offset>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            headers: HashMap::new(),
            topic: topic.into(),
            key: None,
            partition: None,
            offset: None,
            timestamp: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Size in bytes: payload plus headers (keys and values) plus key.
    pub fn size(&self) -> usize {
        let mut size = self.payload.len();
        for (k, v) in &self.headers {
            size += k.len() + v.len();
        }
        if let Some(key) = &self.key {
            size += key.len();
        }
        size
    }

    /// Looks up a header value by key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}
