//! Session error types

use thiserror::Error;

use crate::backend::{BackendError, Capability};
use crate::config::ProtocolKind;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("{operation} is not supported for {protocol}")]
    Unsupported {
        operation: Capability,
        protocol: ProtocolKind,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Backend(BackendError),

    /// The controller task is gone
    #[error("Session closed")]
    Closed,
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotConnected => SessionError::NotConnected,
            BackendError::Unsupported {
                operation,
                protocol,
            } => SessionError::Unsupported {
                operation,
                protocol,
            },
            other => SessionError::Backend(other),
        }
    }
}

impl serde::Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
