use thiserror::Error;

use crate::common::error::AudioqError::GenericError;
use crate::job::OrchestratorError;
use crate::queue::QueueError;
use crate::resources::ScalingProperty;

/// Malformed input detected before anything is sent to the remote queue.
/// These errors are never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid placeholder `{{{0}}}` in command template")]
    UnknownPlaceholder(String),
    #[error("Missing value for placeholder `{{{0}}}`")]
    MissingValue(String),
    #[error("Command template must reference at least one of: {}", .0.join(", "))]
    MissingRequiredPlaceholder(Vec<&'static str>),
    #[error("Cannot combine polynomial resources scaled by {left} and {right}")]
    IncompatibleResources {
        left: ScalingProperty,
        right: ScalingProperty,
    },
}

#[derive(Debug, Error)]
pub enum AudioqError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error(transparent)]
    ValidationError(#[from] ValidationError),
    #[error(transparent)]
    QueueError(#[from] QueueError),
    #[error(transparent)]
    OrchestratorError(#[from] OrchestratorError),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for AudioqError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for AudioqError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<toml::de::Error> for AudioqError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}

impl From<String> for AudioqError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
