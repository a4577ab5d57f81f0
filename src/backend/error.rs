//! Backend error types

use std::io;

use thiserror::Error;

use crate::config::ProtocolKind;

use super::Capability;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    /// The socket under the session went away. Forces a hard disconnect.
    #[error("Connection closed: {0}")]
    TransportClosed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("{operation} is not supported for {protocol}")]
    Unsupported {
        operation: Capability,
        protocol: ProtocolKind,
    },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn unsupported(operation: Capability, protocol: ProtocolKind) -> Self {
        BackendError::Unsupported {
            operation,
            protocol,
        }
    }

    /// Socket-level failure: the backend instance can no longer be used.
    pub fn is_transport_closed(&self) -> bool {
        match self {
            BackendError::TransportClosed(_) => true,
            BackendError::Io(e) => is_disconnect_kind(e.kind()),
            _ => false,
        }
    }

    /// Anything in the connection class (auth, reachability, timeout, closed socket).
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionFailed(_)
                | BackendError::AuthenticationFailed(_)
                | BackendError::Timeout(_)
                | BackendError::HostKeyRejected(_)
        ) || self.is_transport_closed()
    }

    /// Classify a transport-level message from one of the protocol libraries.
    ///
    /// Neither library exposes a structured "socket gone" error, so this goes by text.
    pub fn from_transport_message(message: String) -> Self {
        let lower = message.to_lowercase();
        let closed = [
            "i/o",
            "channel closed",
            "session closed",
            "connection closed",
            "connection reset",
            "connection lost",
            "no connection",
            "broken pipe",
            "unexpected eof",
            "disconnect",
        ];
        if closed.iter().any(|needle| lower.contains(needle)) {
            BackendError::TransportClosed(message)
        } else {
            BackendError::Remote(message)
        }
    }

    /// Map an I/O error coming off a socket (not a local file).
    pub fn from_socket_io(err: io::Error) -> Self {
        if is_disconnect_kind(err.kind()) {
            BackendError::TransportClosed(err.to_string())
        } else if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
            // Blocking sockets report an expired read timeout as WouldBlock on Unix
            BackendError::Timeout(err.to_string())
        } else {
            BackendError::ConnectionFailed(err.to_string())
        }
    }
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

impl From<russh::Error> for BackendError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect | russh::Error::HUP => {
                BackendError::TransportClosed(err.to_string())
            }
            russh::Error::ConnectionTimeout => {
                BackendError::Timeout(err.to_string())
            }
            other => BackendError::ConnectionFailed(other.to_string()),
        }
    }
}

// Presentation layers receive errors as plain strings
impl serde::Serialize for BackendError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
