//! Error types for the widget runtime host.

use thiserror::Error;
use widgetry_types::{InstanceId, PluginIdError};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("permission denied: plugin '{plugin_id}' lacks '{capability}' capability")]
    PermissionDenied {
        plugin_id: String,
        capability: String,
    },

    #[error("rate limit exceeded for '{capability}' by plugin '{plugin_id}'")]
    RateLimitExceeded {
        plugin_id: String,
        capability: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("instance crashed: {instance_id}: {message}")]
    InstanceCrashed {
        instance_id: InstanceId,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(#[from] widgetry_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PluginIdError> for HostError {
    fn from(e: PluginIdError) -> Self {
        Self::InvalidConfig(format!("invalid plugin id: {e}"))
    }
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(widgetry_store::StoreError::Io(e))
    }
}

pub type HostResult<T> = Result<T, HostError>;
