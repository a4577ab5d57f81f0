//! Transfer Module
//!
//! Sequential upload/download queue, cancellation and speed limiting.

pub mod control;
pub mod queue;
pub mod throttle;

pub use control::TransferControl;
pub use queue::{
    fraction, CancelOutcome, TransferDirection, TransferId, TransferQueue, TransferSnapshot,
    TransferTask,
};
pub use throttle::{SpeedLimits, Throttle};
