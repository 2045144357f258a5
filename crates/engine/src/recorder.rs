use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use budgex_core::audit::{ActionEvent, ActionOutcome, AuditSink};
use budgex_core::domain::budget_line::{AvailabilityCheck, BudgetLineId};
use budgex_core::domain::dossier::DossierId;
use budgex_core::domain::stage::{StageKind, StageRecord, StageRecordId, StageStatus};
use budgex_core::domain::step::{approval_circuit, materialize_steps, ValidationStepId};
use budgex_core::numbering::DocumentType;
use budgex_core::workflow::{transition, WorkflowEvent, WorkflowState};
use budgex_core::CoreError;
use budgex_db::repositories::{
    BudgetLineRepository, DossierRepository, StageRecordRepository,
};

use crate::numbers::DocumentNumberService;

/// Input for drafting a stage record. Engagements leave `predecessor_id`
/// empty; every later stage must name the validated record it draws down.
#[derive(Clone, Debug)]
pub struct NewStageRecord {
    pub kind: StageKind,
    pub fiscal_year: i32,
    pub amount: Decimal,
    pub budget_line_id: BudgetLineId,
    pub dossier_id: DossierId,
    pub predecessor_id: Option<StageRecordId>,
    pub object: String,
    pub beneficiary: Option<String>,
    pub created_by: String,
}

/// Drafts and submits stage records.
///
/// Drafting runs every referential and amount check up front so a draft
/// that lands is coherent; nothing is reserved until the final approval.
pub struct StageRecorder {
    lines: Arc<dyn BudgetLineRepository>,
    records: Arc<dyn StageRecordRepository>,
    dossiers: Arc<dyn DossierRepository>,
    numbers: Arc<DocumentNumberService>,
    audit: Arc<dyn AuditSink>,
}

impl StageRecorder {
    pub fn new(
        lines: Arc<dyn BudgetLineRepository>,
        records: Arc<dyn StageRecordRepository>,
        dossiers: Arc<dyn DossierRepository>,
        numbers: Arc<DocumentNumberService>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { lines, records, dossiers, numbers, audit }
    }

    /// Advisory availability check for an engagement amount against a line.
    ///
    /// `exclude` skips the record being edited so its own prior amount does
    /// not count against itself. The answer can go stale the moment it is
    /// returned; the reserve statement re-checks authoritatively.
    pub async fn check_availability(
        &self,
        line_id: &BudgetLineId,
        fiscal_year: i32,
        proposed: Decimal,
        exclude: Option<&StageRecordId>,
    ) -> Result<AvailabilityCheck, CoreError> {
        let line = self
            .lines
            .find_by_id(line_id)
            .await?
            .ok_or_else(|| CoreError::referential("budget_line", line_id.0.clone()))?;
        let prior = self.lines.sum_engagements(line_id, fiscal_year, exclude).await?;
        Ok(AvailabilityCheck::compute(line.dotation(), prior, proposed))
    }

    /// Create a draft stage record after validating amounts, references and
    /// cascade bounds.
    pub async fn create_draft(&self, input: NewStageRecord) -> Result<StageRecord, CoreError> {
        if input.amount <= Decimal::ZERO {
            return Err(CoreError::validation("amount must be strictly positive"));
        }
        if input.object.trim().is_empty() {
            return Err(CoreError::validation("object must not be empty"));
        }

        let line = self
            .lines
            .find_by_id(&input.budget_line_id)
            .await?
            .ok_or_else(|| CoreError::referential("budget_line", input.budget_line_id.0.clone()))?;
        if line.fiscal_year != input.fiscal_year {
            return Err(CoreError::validation(format!(
                "budget line `{}` belongs to fiscal year {}, record targets {}",
                line.code, line.fiscal_year, input.fiscal_year
            )));
        }

        let dossier = self
            .dossiers
            .find_by_id(&input.dossier_id)
            .await?
            .ok_or_else(|| CoreError::referential("dossier", input.dossier_id.0.clone()))?;
        if dossier.closed {
            return Err(CoreError::validation(format!(
                "dossier `{}` is closed",
                dossier.reference
            )));
        }
        if dossier.fiscal_year != input.fiscal_year {
            return Err(CoreError::validation(format!(
                "dossier `{}` belongs to fiscal year {}, record targets {}",
                dossier.reference, dossier.fiscal_year, input.fiscal_year
            )));
        }

        match input.kind.predecessor() {
            None => {
                if input.predecessor_id.is_some() {
                    return Err(CoreError::validation(
                        "an engagement cannot reference a predecessor record",
                    ));
                }
                let check = self
                    .check_availability(
                        &input.budget_line_id,
                        input.fiscal_year,
                        input.amount,
                        None,
                    )
                    .await?;
                if !check.sufficient {
                    return Err(CoreError::InsufficientBudget {
                        available: check.headroom(),
                        requested: input.amount,
                    });
                }
            }
            Some(expected_kind) => {
                let predecessor_id = input.predecessor_id.clone().ok_or_else(|| {
                    CoreError::validation(format!(
                        "a {} requires a validated {} record",
                        input.kind.as_str(),
                        expected_kind.as_str()
                    ))
                })?;
                let predecessor = self
                    .records
                    .find_by_id(&predecessor_id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::referential("stage_record", predecessor_id.0.clone())
                    })?;
                if predecessor.kind != expected_kind {
                    return Err(CoreError::validation(format!(
                        "predecessor of a {} must be a {}, got a {}",
                        input.kind.as_str(),
                        expected_kind.as_str(),
                        predecessor.kind.as_str()
                    )));
                }
                if predecessor.status != StageStatus::Validated {
                    return Err(CoreError::validation(format!(
                        "predecessor `{}` is {}, only validated records can be drawn down",
                        predecessor_id.0,
                        predecessor.status.as_str()
                    )));
                }
                if predecessor.budget_line_id != input.budget_line_id
                    || predecessor.dossier_id != input.dossier_id
                {
                    return Err(CoreError::validation(format!(
                        "predecessor `{}` belongs to another budget line or dossier",
                        predecessor_id.0
                    )));
                }

                // In-flight siblings count against the bound so two drafts
                // cannot jointly exceed the predecessor.
                let siblings =
                    self.records.sum_by_predecessor(&predecessor_id, None).await?;
                let remaining = predecessor.amount - siblings;
                if input.amount > remaining {
                    return Err(CoreError::InsufficientBudget {
                        available: remaining,
                        requested: input.amount,
                    });
                }
            }
        }

        let now = Utc::now();
        let record = StageRecord {
            id: StageRecordId(Uuid::new_v4().to_string()),
            kind: input.kind,
            document_number: None,
            amount: input.amount,
            fiscal_year: input.fiscal_year,
            status: StageStatus::Draft,
            current_step: 0,
            deferral: None,
            budget_line_id: input.budget_line_id,
            predecessor_id: input.predecessor_id,
            dossier_id: input.dossier_id,
            object: input.object,
            beneficiary: input.beneficiary,
            created_by: input.created_by.clone(),
            created_at: now,
            updated_at: now,
        };
        self.records.save(record.clone()).await?;

        self.audit.emit(
            ActionEvent::new(
                "stage_record",
                record.id.0.clone(),
                "create_draft",
                input.created_by,
                ActionOutcome::Success,
            )
            .with_metadata("kind", record.kind.as_str())
            .with_metadata("amount", record.amount.to_string()),
        );
        tracing::info!(record_id = %record.id.0, kind = record.kind.as_str(), "draft created");
        Ok(record)
    }

    /// Submit a draft: assign its official document number and open the
    /// approval circuit at step one.
    pub async fn submit(&self, record_id: &StageRecordId, actor: &str) -> Result<StageRecord, CoreError> {
        let record = self
            .records
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| CoreError::referential("stage_record", record_id.0.clone()))?;
        if record.status != StageStatus::Draft {
            return Err(CoreError::AlreadyProcessed(format!(
                "record `{}` is no longer a draft",
                record.id.0
            )));
        }

        let circuit = approval_circuit(record.kind);
        let state = WorkflowState::from_columns(record.status, record.current_step, circuit.len());
        let next = transition(&state, &WorkflowEvent::Submit { total_steps: circuit.len() })
            .map_err(|e| CoreError::validation(e.to_string()))?;

        // Winning the draft-to-submitted flip arbitrates a double submit;
        // steps and the official number only exist for the winner.
        let moved = self
            .records
            .transition_status(
                &record.id,
                StageStatus::Draft,
                record.current_step,
                next.status(),
                next.pending_step().unwrap_or(0),
            )
            .await?;
        if !moved {
            return Err(CoreError::AlreadyProcessed(format!(
                "record `{}` is no longer a draft",
                record.id.0
            )));
        }

        let steps = materialize_steps(&record.id, record.kind, || {
            ValidationStepId(Uuid::new_v4().to_string())
        });
        self.records.insert_steps(&steps).await?;

        let number = self
            .numbers
            .assign(DocumentType::from(record.kind), record.fiscal_year, None)
            .await?;
        self.records.set_document_number(&record.id, &number).await?;

        self.audit.emit(
            ActionEvent::new(
                "stage_record",
                record.id.0.clone(),
                "submit",
                actor,
                ActionOutcome::Success,
            )
            .with_metadata("document_number", number.clone()),
        );
        tracing::info!(record_id = %record.id.0, document_number = %number, "record submitted");

        self.records
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| CoreError::referential("stage_record", record_id.0.clone()))
    }
}
