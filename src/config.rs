//! Configuration for the flow engine.
//!
//! A flow is described by a YAML document with `mode`, `thread_pool`,
//! `back_pressure`, an optional `processor_class` and exactly one
//! mode-specific block. Broker `connection` blocks are opaque to the engine
//! and pass through unmodified to the adapter that consumes them.

use std::path::Path;

use serde::Deserialize;

use crate::error::{FlowError, Result};

/// Topology mode of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    Funnel,
    Fan,
    OneToOne,
}

impl std::fmt::Display for FlowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Funnel => write!(f, "funnel"),
            Self::Fan => write!(f, "fan"),
            Self::OneToOne => write!(f, "one_to_one"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadPoolConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_size: default_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackPressureConfig {
    #[serde(default = "default_back_pressure_enabled")]
    pub enabled: bool,
    #[serde(default = "default_high_watermark")]
    pub queue_high_watermark: f64,
    #[serde(default = "default_low_watermark")]
    pub queue_low_watermark: f64,
}

impl Default for BackPressureConfig {
    fn default() -> Self {
        Self {
            enabled: default_back_pressure_enabled(),
            queue_high_watermark: default_high_watermark(),
            queue_low_watermark: default_low_watermark(),
        }
    }
}

fn default_max_workers() -> usize {
    10
}

fn default_queue_size() -> usize {
    1000
}

fn default_back_pressure_enabled() -> bool {
    true
}

fn default_high_watermark() -> f64 {
    0.8
}

fn default_low_watermark() -> f64 {
    0.5
}

/// Opaque connection parameters handed to an adapter's constructor.
pub type ConnectionParams = serde_json::Map<String, serde_json::Value>;

/// One broker endpoint: adapter type plus its opaque connection block.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Adapter type name resolved through the adapter registry.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub connection: ConnectionParams,
    /// Topics this endpoint subscribes to (funnel sources only).
    #[serde(default)]
    pub topics: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunnelConfig {
    pub sources: Vec<SystemConfig>,
    pub destination: SystemConfig,
    pub destination_topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanConfig {
    pub source: SystemConfig,
    pub source_topic: String,
    pub destination: SystemConfig,
    pub destination_resolver: ResolverConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicMapping {
    pub source_topic: String,
    pub destination_topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneToOneConfig {
    pub source: SystemConfig,
    pub destination: SystemConfig,
    pub mappings: Vec<TopicMapping>,
}

/// Validated flow configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    pub mode: FlowMode,
    #[serde(default)]
    pub thread_pool: ThreadPoolConfig,
    #[serde(default)]
    pub back_pressure: BackPressureConfig,
    /// Name of a registered processor; pass-through when absent.
    #[serde(default)]
    pub processor_class: Option<String>,
    pub funnel: Option<FunnelConfig>,
    pub fan: Option<FanConfig>,
    pub one_to_one: Option<OneToOneConfig>,
}

impl FlowConfig {
    /// Loads a config from a YAML file, with environment overrides
    /// (`FLOWBRIDGE__` prefix, `__` separator).
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("FLOWBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: FlowConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Enforces every construction-time constraint; violations are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.thread_pool.max_workers < 1 {
            return Err(FlowError::Config(
                "thread_pool.max_workers must be >= 1".to_string(),
            ));
        }
        if self.thread_pool.queue_size < 1 {
            return Err(FlowError::Config(
                "thread_pool.queue_size must be >= 1".to_string(),
            ));
        }

        let high = self.back_pressure.queue_high_watermark;
        let low = self.back_pressure.queue_low_watermark;
        if !(high > 0.0 && high <= 1.0) {
            return Err(FlowError::Config(format!(
                "back_pressure.queue_high_watermark must be in (0, 1], got {high}"
            )));
        }
        if !(low >= 0.0 && low < high) {
            return Err(FlowError::Config(format!(
                "back_pressure.queue_low_watermark must be in [0, {high}), got {low}"
            )));
        }

        let blocks = [
            self.funnel.is_some(),
            self.fan.is_some(),
            self.one_to_one.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        if blocks != 1 {
            return Err(FlowError::Config(format!(
                "exactly one of funnel/fan/one_to_one must be configured, found {blocks}"
            )));
        }

        match self.mode {
            FlowMode::Funnel => {
                let funnel = self
                    .funnel
                    .as_ref()
                    .ok_or_else(|| FlowError::Config("mode is funnel but the funnel block is missing".to_string()))?;
                if funnel.sources.is_empty() {
                    return Err(FlowError::Config("funnel.sources must not be empty".to_string()));
                }
            }
            FlowMode::Fan => {
                let fan = self
                    .fan
                    .as_ref()
                    .ok_or_else(|| FlowError::Config("mode is fan but the fan block is missing".to_string()))?;
                crate::routing::DestinationResolver::from_config(
                    &fan.destination_resolver.kind,
                    &fan.destination_resolver.key,
                )?;
            }
            FlowMode::OneToOne => {
                let one_to_one = self.one_to_one.as_ref().ok_or_else(|| {
                    FlowError::Config("mode is one_to_one but the one_to_one block is missing".to_string())
                })?;
                if one_to_one.mappings.is_empty() {
                    return Err(FlowError::Config("one_to_one.mappings must not be empty".to_string()));
                }
                let mut seen = std::collections::HashSet::new();
                for mapping in &one_to_one.mappings {
                    if !seen.insert(mapping.source_topic.as_str()) {
                        return Err(FlowError::Config(format!(
                            "duplicate one_to_one mapping for source topic {}",
                            mapping.source_topic
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
