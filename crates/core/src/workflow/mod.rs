pub mod states;

use thiserror::Error;

pub use states::{WorkflowEvent, WorkflowState};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: WorkflowState, event: WorkflowEvent },
    #[error("approval circuit must have at least one step")]
    EmptyCircuit,
}

/// Pure transition function for the stage-record workflow.
///
/// Role gating, reason validation and ledger effects are the engine's
/// business; this function only answers "is this move legal, and where does
/// it land".
pub fn transition(
    current: &WorkflowState,
    event: &WorkflowEvent,
) -> Result<WorkflowState, WorkflowTransitionError> {
    use WorkflowEvent::{Cancel, Defer, Reject, Resume, StepApproved, Submit};
    use WorkflowState::{Cancelled, Deferred, Draft, InValidation, Rejected, Validated};

    let next = match (current, event) {
        (Draft, Submit { total_steps }) => {
            if *total_steps == 0 {
                return Err(WorkflowTransitionError::EmptyCircuit);
            }
            InValidation { step: 1, total_steps: *total_steps }
        }
        (InValidation { step, total_steps }, StepApproved) => {
            if *step < *total_steps {
                InValidation { step: step + 1, total_steps: *total_steps }
            } else {
                Validated
            }
        }
        (InValidation { .. }, Reject) => Rejected,
        (InValidation { step, total_steps }, Defer) => {
            Deferred { step: *step, total_steps: *total_steps }
        }
        // Resume returns to exactly the step held before deferral.
        (Deferred { step, total_steps }, Resume) => {
            InValidation { step: *step, total_steps: *total_steps }
        }
        (Deferred { .. }, Reject) => Rejected,
        (Validated, Cancel) => Cancelled,
        _ => {
            return Err(WorkflowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(next)
}
