//! IPC result envelope.
//!
//! Every capability and lifecycle call crossing the render boundary returns
//! this shape; host errors are flattened into `{kind, message}` rather than
//! thrown across the process boundary.

use crate::error::HostError;
use serde::{Deserialize, Serialize};

/// Error classification exposed to plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    PermissionDenied,
    RateLimitExceeded,
    InvalidConfig,
    InstanceCrashed,
    NetworkError,
    StorageError,
}

/// Error payload inside a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Response envelope for capability and lifecycle IPC calls.
///
/// `data` is present only when `success` is true; `error` only when false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl<T> IpcEnvelope<T> {
    /// Wraps a successful result.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Wraps a host error.
    pub fn err(error: &HostError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(IpcError {
                kind: error.kind(),
                message: error.to_string(),
            }),
        }
    }
}

impl<T> From<Result<T, HostError>> for IpcEnvelope<T> {
    fn from(result: Result<T, HostError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}

impl HostError {
    /// Envelope classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::InstanceCrashed { .. } => ErrorKind::InstanceCrashed,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::Storage(_) | Self::Serialization(_) => ErrorKind::StorageError,
        }
    }
}
