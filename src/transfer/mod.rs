//! Cancellable, resumable file operations on a connected share

pub mod progress;
pub mod state;
pub mod task;
mod worker;

pub use progress::{PartialPolicy, ResumePoint, TransferDirection, TransferProgress};
pub use state::TransferTaskState;
pub use task::{TransferOutcome, TransferRequest, TransferTask};
