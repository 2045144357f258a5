use serde::{Deserialize, Serialize};

use crate::domain::stage::StageStatus;

/// Tagged-variant state of one stage record going through its approval
/// circuit. The step position lives inside the state so the
/// single-pending-step invariant is carried by construction rather than by
/// parallel mutable columns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Draft,
    /// Submitted, waiting on the step at `step` (1-based) out of
    /// `total_steps`.
    InValidation { step: usize, total_steps: usize },
    /// Parked with a mandatory reason; the pending step index is preserved.
    Deferred { step: usize, total_steps: usize },
    Validated,
    Rejected,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validated | Self::Rejected | Self::Cancelled)
    }

    /// The step currently awaiting a signature, if any.
    pub fn pending_step(&self) -> Option<usize> {
        match self {
            Self::InValidation { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Record-level status column for persistence.
    pub fn status(&self) -> StageStatus {
        match self {
            Self::Draft => StageStatus::Draft,
            Self::InValidation { .. } => StageStatus::Submitted,
            Self::Deferred { .. } => StageStatus::Deferred,
            Self::Validated => StageStatus::Validated,
            Self::Rejected => StageStatus::Rejected,
            Self::Cancelled => StageStatus::Cancelled,
        }
    }

    /// Rebuild the state from the persisted status + step columns.
    pub fn from_columns(
        status: StageStatus,
        current_step: usize,
        total_steps: usize,
    ) -> WorkflowState {
        match status {
            StageStatus::Draft => Self::Draft,
            StageStatus::Submitted => Self::InValidation { step: current_step, total_steps },
            StageStatus::Deferred => Self::Deferred { step: current_step, total_steps },
            StageStatus::Validated => Self::Validated,
            StageStatus::Rejected => Self::Rejected,
            StageStatus::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    /// Operator submits the draft; the approval circuit has `total_steps`
    /// steps.
    Submit { total_steps: usize },
    /// The pending step was signed by the required role.
    StepApproved,
    Reject,
    Defer,
    Resume,
    /// Cancellation of an already validated record (the only path that
    /// later reduces a ledger total).
    Cancel,
}
