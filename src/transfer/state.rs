//! Transfer task lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a transfer task.
///
/// `Ready → Running → {Completed | Cancelled}`, with `Running ↔ Suspended`
/// as a side loop. Any non-terminal state may be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferTaskState {
    Ready,
    Running,
    Suspended,
    Cancelled,
    Completed,
}

impl TransferTaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    pub fn can_transition_to(self, next: TransferTaskState) -> bool {
        use TransferTaskState::*;
        match (self, next) {
            (Ready, Running)
            | (Running, Suspended)
            | (Suspended, Running)
            | (Running, Completed) => true,
            (Ready | Running | Suspended, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}
