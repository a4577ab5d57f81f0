//! Session Module
//!
//! The session controller owns one connection at a time and publishes a
//! snapshot of everything a browser view needs: connection state, current
//! path, file list, last error and the transfer queue.

mod controller;
pub mod error;
pub mod navigation;
pub mod types;

pub use controller::SessionHandle;
pub use error::SessionError;
pub use navigation::{Debouncer, EpochCounter, RequestEpoch};
pub use types::{ConnectionState, SessionEvent, SessionSnapshot, TransferOutcome};
