//! Progress snapshots and resumable positions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bytes moved so far. Delete, create-directory and move tasks count items
/// instead of bytes and have no total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Completed share in `0.0..=1.0`, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some(self.bytes_transferred as f64 / total as f64),
            None => None,
        }
    }
}

/// Direction of a resumable single-file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Download,
    Upload,
}

/// Where an interrupted transfer stands. Callers persist it to resume after
/// a restart; within one process the task itself keeps its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub direction: TransferDirection,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub offset: u64,
}

/// What happens to a partially written destination when a task does not
/// complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartialPolicy {
    /// Leave the partial file for a later resume
    #[default]
    Keep,
    Delete,
}
