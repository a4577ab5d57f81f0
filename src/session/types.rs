//! Published session state

use std::sync::Arc;

use serde::Serialize;

use crate::backend::RemoteFile;
use crate::transfer::{TransferId, TransferSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Everything the presentation layer renders, published as one value
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub connection_state: ConnectionState,
    pub connected: bool,
    /// Display name of the site, set once connected
    pub server_name: Option<String>,
    pub current_path: String,
    pub files: Arc<Vec<RemoteFile>>,
    /// Last error, cleared by the next profile load or `clear_error`
    pub error: Option<String>,
    /// A listing request is in flight
    pub loading: bool,
    pub active_transfer: Option<TransferSnapshot>,
    pub transfers: Vec<TransferSnapshot>,
    pub aggregate_progress: f64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            connected: false,
            server_name: None,
            current_path: "/".to_string(),
            files: Arc::new(Vec::new()),
            error: None,
            loading: false,
            active_transfer: None,
            transfers: Vec::new(),
            aggregate_progress: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum TransferOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// One-shot notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A listing attempt finished; any selection in the old list is void
    SelectionReset,
    TransferFinished {
        id: TransferId,
        outcome: TransferOutcome,
    },
    /// The connection was dropped without being asked to
    Disconnected { reason: String },
}
