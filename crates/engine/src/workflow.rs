use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use budgex_core::audit::{ActionEvent, ActionOutcome, AuditSink};
use budgex_core::domain::stage::{DeferralInfo, StageRecord, StageRecordId, StageStatus};
use budgex_core::domain::step::ApprovalRole;
use budgex_core::workflow::{transition, WorkflowEvent, WorkflowState};
use budgex_core::CoreError;
use budgex_db::repositories::{
    BudgetLineRepository, ReserveOutcome, StageRecordRepository, StepClaim,
};

use crate::tracker::DossierChainTracker;

const MIN_REASON_LEN: usize = 10;

/// Drives submitted records through their approval circuits.
///
/// Every decision goes through one conditional status flip keyed on the
/// (status, step) pair, so rival approvals, rejections and deferrals on the
/// same record resolve to one winner and losers that see `AlreadyProcessed`.
/// The final-step budget reservation happens before the flip and is released
/// whenever the flip is lost, so only a validated record ever stays counted.
pub struct ValidationWorkflowEngine {
    records: Arc<dyn StageRecordRepository>,
    lines: Arc<dyn BudgetLineRepository>,
    tracker: Arc<DossierChainTracker>,
    audit: Arc<dyn AuditSink>,
}

impl ValidationWorkflowEngine {
    pub fn new(
        records: Arc<dyn StageRecordRepository>,
        lines: Arc<dyn BudgetLineRepository>,
        tracker: Arc<DossierChainTracker>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { records, lines, tracker, audit }
    }

    async fn load(&self, record_id: &StageRecordId) -> Result<StageRecord, CoreError> {
        self.records
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| CoreError::referential("stage_record", record_id.0.clone()))
    }

    async fn state_of(&self, record: &StageRecord) -> Result<(WorkflowState, usize), CoreError> {
        let steps = self.records.steps_for(&record.id).await?;
        let total = steps.len();
        Ok((WorkflowState::from_columns(record.status, record.current_step, total), total))
    }

    fn require_pending_step(state: &WorkflowState, record_id: &StageRecordId) -> Result<usize, CoreError> {
        state.pending_step().ok_or_else(|| {
            CoreError::validation(format!(
                "record `{}` has no step awaiting validation",
                record_id.0
            ))
        })
    }

    fn require_reason(reason: &str) -> Result<(), CoreError> {
        if reason.trim().chars().count() < MIN_REASON_LEN {
            return Err(CoreError::validation(format!(
                "a motivated reason of at least {MIN_REASON_LEN} characters is required"
            )));
        }
        Ok(())
    }

    /// Sign the pending step. Validating the last step reserves the amount
    /// on the budget line and finalizes the record.
    pub async fn approve(
        &self,
        record_id: &StageRecordId,
        actor: &str,
        role: ApprovalRole,
        comments: Option<&str>,
    ) -> Result<StageRecord, CoreError> {
        let record = self.load(record_id).await?;
        let (state, _total) = self.state_of(&record).await?;
        let position = Self::require_pending_step(&state, record_id)?;

        let steps = self.records.steps_for(record_id).await?;
        let step = steps
            .iter()
            .find(|s| s.position == position)
            .ok_or_else(|| CoreError::validation(format!(
                "record `{}` has no step at position {position}",
                record_id.0
            )))?;
        if step.required_role != role {
            return Err(CoreError::RoleMismatch { required: step.required_role, actual: role });
        }

        let next = transition(&state, &WorkflowEvent::StepApproved)
            .map_err(|e| CoreError::validation(e.to_string()))?;
        let finalizing = next == WorkflowState::Validated;

        // The reserve comes first: a refused reservation leaves the record
        // submitted and its step pending so the operator can amend and retry.
        if finalizing {
            match self
                .lines
                .reserve(&record.budget_line_id, record.kind, record.amount)
                .await?
            {
                ReserveOutcome::Applied => {}
                ReserveOutcome::Insufficient { dotation, total_engage } => {
                    self.audit.emit(
                        ActionEvent::new(
                            "stage_record",
                            record_id.0.clone(),
                            "approve",
                            actor,
                            ActionOutcome::Rejected,
                        )
                        .with_metadata("refusal", "insufficient_budget"),
                    );
                    return Err(CoreError::InsufficientBudget {
                        available: dotation - total_engage,
                        requested: record.amount,
                    });
                }
            }
        }

        // The status flip is the arbitration point: only one decision can
        // move the record out of (submitted, position), so a rival approval,
        // rejection or deferral landing first surfaces here, before the step
        // is signed and with the reservation still undoable.
        let moved = self
            .records
            .transition_status(
                record_id,
                StageStatus::Submitted,
                position,
                next.status(),
                next.pending_step().unwrap_or(position),
            )
            .await?;
        if !moved {
            if finalizing {
                self.lines
                    .release(&record.budget_line_id, record.kind, record.amount)
                    .await?;
            }
            return Err(CoreError::AlreadyProcessed(format!(
                "step {position} of record `{}` was already decided",
                record_id.0
            )));
        }

        let claimed = self
            .records
            .claim_step(record_id, position, StepClaim::Validate {
                actor,
                at: Utc::now(),
                comments,
            })
            .await?;
        if !claimed {
            // Claims only follow a won flip; a non-pending step here means
            // the store was written out of band.
            if finalizing {
                self.lines
                    .release(&record.budget_line_id, record.kind, record.amount)
                    .await?;
            }
            return Err(CoreError::AlreadyProcessed(format!(
                "step {position} of record `{}` was already signed",
                record_id.0
            )));
        }

        if finalizing {
            self.tracker.refresh(&record.dossier_id).await?;
        }

        self.audit.emit(
            ActionEvent::new("stage_record", record_id.0.clone(), "approve", actor, ActionOutcome::Success)
                .with_metadata("step", position.to_string())
                .with_metadata("finalized", finalizing.to_string()),
        );
        tracing::info!(record_id = %record_id.0, step = position, finalizing, "step approved");
        self.load(record_id).await
    }

    /// Reject the record at its pending step. Works from the submitted and
    /// the deferred state; the reason is mandatory and motivated.
    pub async fn reject(
        &self,
        record_id: &StageRecordId,
        actor: &str,
        role: ApprovalRole,
        reason: &str,
    ) -> Result<StageRecord, CoreError> {
        Self::require_reason(reason)?;
        let record = self.load(record_id).await?;
        let (state, _total) = self.state_of(&record).await?;

        let position = match &state {
            WorkflowState::InValidation { step, .. } | WorkflowState::Deferred { step, .. } => *step,
            _ => {
                return Err(CoreError::validation(format!(
                    "record `{}` cannot be rejected in its current state",
                    record_id.0
                )))
            }
        };

        let steps = self.records.steps_for(record_id).await?;
        let step = steps
            .iter()
            .find(|s| s.position == position)
            .ok_or_else(|| CoreError::validation(format!(
                "record `{}` has no step at position {position}",
                record_id.0
            )))?;
        if step.required_role != role {
            return Err(CoreError::RoleMismatch { required: step.required_role, actual: role });
        }

        let next = transition(&state, &WorkflowEvent::Reject)
            .map_err(|e| CoreError::validation(e.to_string()))?;

        let moved = self
            .records
            .transition_status(record_id, record.status, position, next.status(), position)
            .await?;
        if !moved {
            return Err(CoreError::AlreadyProcessed(format!(
                "step {position} of record `{}` was already decided",
                record_id.0
            )));
        }

        let claimed = self
            .records
            .claim_step(record_id, position, StepClaim::Reject {
                actor,
                at: Utc::now(),
                reason,
            })
            .await?;
        if !claimed {
            return Err(CoreError::AlreadyProcessed(format!(
                "step {position} of record `{}` was already signed",
                record_id.0
            )));
        }

        // A rejected record is terminal; parked-state metadata goes with it.
        if record.status == StageStatus::Deferred {
            self.records.set_deferral(record_id, None).await?;
        }

        self.audit.emit(
            ActionEvent::new("stage_record", record_id.0.clone(), "reject", actor, ActionOutcome::Success)
                .with_metadata("step", position.to_string())
                .with_metadata("reason", reason),
        );
        tracing::info!(record_id = %record_id.0, step = position, "record rejected");
        self.load(record_id).await
    }

    /// Park the record at its pending step, keeping the step so resumption
    /// does not restart the circuit.
    pub async fn defer(
        &self,
        record_id: &StageRecordId,
        actor: &str,
        role: ApprovalRole,
        reason: &str,
        resume_condition: Option<&str>,
        target_date: Option<NaiveDate>,
    ) -> Result<StageRecord, CoreError> {
        Self::require_reason(reason)?;
        let record = self.load(record_id).await?;
        let (state, _total) = self.state_of(&record).await?;
        let position = Self::require_pending_step(&state, record_id)?;

        let steps = self.records.steps_for(record_id).await?;
        let step = steps
            .iter()
            .find(|s| s.position == position)
            .ok_or_else(|| CoreError::validation(format!(
                "record `{}` has no step at position {position}",
                record_id.0
            )))?;
        if step.required_role != role {
            return Err(CoreError::RoleMismatch { required: step.required_role, actual: role });
        }

        let next = transition(&state, &WorkflowEvent::Defer)
            .map_err(|e| CoreError::validation(e.to_string()))?;

        let moved = self
            .records
            .transition_status(record_id, StageStatus::Submitted, position, next.status(), position)
            .await?;
        if !moved {
            return Err(CoreError::AlreadyProcessed(format!(
                "record `{}` moved concurrently",
                record_id.0
            )));
        }

        let deferral = DeferralInfo {
            reason: reason.to_owned(),
            resume_condition: resume_condition.map(str::to_owned),
            target_date,
            deferred_by: actor.to_owned(),
            deferred_at: Utc::now(),
        };
        self.records.set_deferral(record_id, Some(&deferral)).await?;

        self.audit.emit(
            ActionEvent::new("stage_record", record_id.0.clone(), "defer", actor, ActionOutcome::Success)
                .with_metadata("step", position.to_string())
                .with_metadata("reason", reason),
        );
        tracing::info!(record_id = %record_id.0, step = position, "record deferred");
        self.load(record_id).await
    }

    /// Bring a deferred record back in front of the same step it was parked
    /// on.
    pub async fn resume(
        &self,
        record_id: &StageRecordId,
        actor: &str,
    ) -> Result<StageRecord, CoreError> {
        let record = self.load(record_id).await?;
        let (state, _total) = self.state_of(&record).await?;
        let next = transition(&state, &WorkflowEvent::Resume)
            .map_err(|e| CoreError::validation(e.to_string()))?;
        let position = Self::require_pending_step(&next, record_id)?;

        let moved = self
            .records
            .transition_status(record_id, StageStatus::Deferred, position, next.status(), position)
            .await?;
        if !moved {
            return Err(CoreError::AlreadyProcessed(format!(
                "record `{}` moved concurrently",
                record_id.0
            )));
        }
        self.records.set_deferral(record_id, None).await?;

        self.audit.emit(ActionEvent::new(
            "stage_record",
            record_id.0.clone(),
            "resume",
            actor,
            ActionOutcome::Success,
        ));
        tracing::info!(record_id = %record_id.0, step = position, "record resumed");
        self.load(record_id).await
    }

    /// Cancel a validated record, releasing its amount from the ledger
    /// total it consumed. The only transition that ever reduces a total.
    pub async fn cancel(
        &self,
        record_id: &StageRecordId,
        actor: &str,
        reason: &str,
    ) -> Result<StageRecord, CoreError> {
        Self::require_reason(reason)?;
        let record = self.load(record_id).await?;
        let (state, _total) = self.state_of(&record).await?;
        let next = transition(&state, &WorkflowEvent::Cancel)
            .map_err(|e| CoreError::validation(e.to_string()))?;

        // A validated record with validated successors cannot be undone
        // without orphaning them.
        let drawn = self.records.sum_by_predecessor(record_id, None).await?;
        if drawn > rust_decimal::Decimal::ZERO {
            return Err(CoreError::validation(format!(
                "record `{}` has {drawn} drawn down by successor records",
                record_id.0
            )));
        }

        let moved = self
            .records
            .transition_status(
                record_id,
                StageStatus::Validated,
                record.current_step,
                next.status(),
                record.current_step,
            )
            .await?;
        if !moved {
            return Err(CoreError::AlreadyProcessed(format!(
                "record `{}` moved concurrently",
                record_id.0
            )));
        }

        self.lines
            .release(&record.budget_line_id, record.kind, record.amount)
            .await?;
        self.tracker.refresh(&record.dossier_id).await?;

        self.audit.emit(
            ActionEvent::new("stage_record", record_id.0.clone(), "cancel", actor, ActionOutcome::Success)
                .with_metadata("reason", reason)
                .with_metadata("released", record.amount.to_string()),
        );
        tracing::info!(record_id = %record_id.0, "record cancelled");
        self.load(record_id).await
    }
}
