//! Error types for the flow engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read configuration: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("connection failed: {0}")]
    Connection(anyhow::Error),

    #[error("adapter error: {0}")]
    Adapter(anyhow::Error),

    #[error("unknown adapter type: {0}")]
    UnknownAdapter(String),

    #[error("unknown processor: {0}")]
    UnknownProcessor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = FlowError> = std::result::Result<T, E>;
