mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use budgex_core::domain::budget_line::BudgetLineId;
use budgex_core::domain::dossier::DossierId;
use budgex_core::domain::stage::{
    DeferralInfo, StageKind, StageRecord, StageRecordId, StageStatus,
};
use budgex_core::domain::step::{approval_circuit, ApprovalRole, StepStatus, ValidationStep};
use budgex_core::CoreError;
use budgex_db::repositories::{
    BudgetLineRepository, RepositoryError, StageRecordRepository, StepClaim,
};
use budgex_engine::{StageRecorder, ValidationWorkflowEngine};

use common::{approve_fully, draft, harness, seed_dossier, seed_line};

#[tokio::test]
async fn each_step_is_gated_by_its_role() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    h.recorder.submit(&record.id, "operator").await.expect("submit");

    // Step one belongs to the financial officer; the director general
    // cannot jump the queue.
    let mismatch = h
        .workflow
        .approve(&record.id, "dg", ApprovalRole::DirectorGeneral, None)
        .await
        .expect_err("wrong role");
    assert_eq!(
        mismatch,
        CoreError::RoleMismatch {
            required: ApprovalRole::FinancialOfficer,
            actual: ApprovalRole::DirectorGeneral,
        }
    );

    let steps = h.records.steps_for(&record.id).await.expect("steps");
    assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn steps_are_signed_strictly_in_order() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    h.recorder.submit(&record.id, "operator").await.expect("submit");

    let circuit = approval_circuit(StageKind::Engagement);
    h.workflow
        .approve(&record.id, "fo", circuit[0], Some("pièces complètes"))
        .await
        .expect("step 1");

    // Re-signing with step one's role now fails against step two.
    let repeat = h
        .workflow
        .approve(&record.id, "fo", circuit[0], None)
        .await
        .expect_err("step already signed");
    assert!(matches!(repeat, CoreError::RoleMismatch { .. }));

    let steps = h.records.steps_for(&record.id).await.expect("steps");
    assert_eq!(steps[0].status, StepStatus::Validated);
    assert_eq!(steps[0].validated_by.as_deref(), Some("fo"));
    assert_eq!(steps[0].comments.as_deref(), Some("pièces complètes"));
    assert_eq!(steps[1].status, StepStatus::Pending);
}

#[tokio::test]
async fn rejection_requires_a_motivated_reason() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    h.recorder.submit(&record.id, "operator").await.expect("submit");

    let too_short = h
        .workflow
        .reject(&record.id, "fo", ApprovalRole::FinancialOfficer, "non")
        .await
        .expect_err("reason too short");
    assert!(matches!(too_short, CoreError::Validation(_)));

    let rejected = h
        .workflow
        .reject(
            &record.id,
            "fo",
            ApprovalRole::FinancialOfficer,
            "pièces justificatives manquantes",
        )
        .await
        .expect("reject");
    assert_eq!(rejected.status, StageStatus::Rejected);

    // Nothing was consumed on the line.
    let line = h
        .lines
        .find_by_id(&BudgetLineId("BL-1".to_owned()))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(line.total_engage, Decimal::ZERO);

    let steps = h.records.steps_for(&record.id).await.expect("steps");
    assert_eq!(steps[0].status, StepStatus::Rejected);
    assert_eq!(steps[0].comments.as_deref(), Some("pièces justificatives manquantes"));
}

#[tokio::test]
async fn defer_parks_the_record_and_resume_returns_to_the_same_step() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    h.recorder.submit(&record.id, "operator").await.expect("submit");

    let circuit = approval_circuit(StageKind::Engagement);
    h.workflow.approve(&record.id, "fo", circuit[0], None).await.expect("step 1");

    let deferred = h
        .workflow
        .defer(
            &record.id,
            "bc",
            circuit[1],
            "facture originale non reçue",
            Some("réception de la facture"),
            NaiveDate::from_ymd_opt(2026, 11, 15),
        )
        .await
        .expect("defer");
    assert_eq!(deferred.status, StageStatus::Deferred);
    let info = deferred.deferral.expect("deferral recorded");
    assert_eq!(info.reason, "facture originale non reçue");
    assert_eq!(info.resume_condition.as_deref(), Some("réception de la facture"));

    // Parked records cannot be signed.
    let parked = h
        .workflow
        .approve(&record.id, "bc", circuit[1], None)
        .await
        .expect_err("deferred record");
    assert!(matches!(parked, CoreError::Validation(_)));

    let resumed = h.workflow.resume(&record.id, "bc").await.expect("resume");
    assert_eq!(resumed.status, StageStatus::Submitted);
    assert_eq!(resumed.current_step, 2);
    assert!(resumed.deferral.is_none());

    // The circuit picks up where it stopped, not from the beginning.
    let validated = {
        h.workflow.approve(&record.id, "bc", circuit[1], None).await.expect("step 2");
        h.workflow.approve(&record.id, "ad", circuit[2], None).await.expect("step 3");
        h.workflow.approve(&record.id, "dg", circuit[3], None).await.expect("step 4")
    };
    assert_eq!(validated.status, StageStatus::Validated);
}

#[tokio::test]
async fn a_deferred_record_can_still_be_rejected() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    h.recorder.submit(&record.id, "operator").await.expect("submit");

    h.workflow
        .defer(
            &record.id,
            "fo",
            ApprovalRole::FinancialOfficer,
            "dossier incomplet, complément demandé",
            None,
            None,
        )
        .await
        .expect("defer");

    let rejected = h
        .workflow
        .reject(
            &record.id,
            "fo",
            ApprovalRole::FinancialOfficer,
            "complément jamais fourni",
        )
        .await
        .expect("reject from deferred");
    assert_eq!(rejected.status, StageStatus::Rejected);
    // The parked-state metadata does not outlive the record.
    assert!(rejected.deferral.is_none());
}

#[tokio::test]
async fn a_draft_cannot_be_submitted_twice() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    let submitted = h.recorder.submit(&record.id, "operator").await.expect("submit");
    assert_eq!(submitted.document_number.as_deref(), Some("ENG-2026-0001"));

    let replay = h
        .recorder
        .submit(&record.id, "operator")
        .await
        .expect_err("second submit");
    assert!(matches!(replay, CoreError::AlreadyProcessed(_)));

    // The replay drew no steps and no document number.
    let steps = h.records.steps_for(&record.id).await.expect("steps");
    assert_eq!(steps.len(), approval_circuit(StageKind::Engagement).len());
    let found = h
        .records
        .find_by_id(&record.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(found.document_number.as_deref(), Some("ENG-2026-0001"));
}

#[tokio::test]
async fn document_numbers_are_sequential_per_type_and_year() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 2_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 500_000_00).await;
    seed_dossier(&h, "D-2", 2026, 500_000_00).await;

    let first = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 200_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    let first = h.recorder.submit(&first.id, "operator").await.expect("submit");
    assert_eq!(first.document_number.as_deref(), Some("ENG-2026-0001"));

    let second = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 200_000_00, "BL-1", "D-2", None))
        .await
        .expect("draft");
    let second = h.recorder.submit(&second.id, "operator").await.expect("submit");
    assert_eq!(second.document_number.as_deref(), Some("ENG-2026-0002"));

    // Each document family counts on its own.
    approve_fully(&h, &first.id, StageKind::Engagement).await.expect("validate");
    let liquidation = h
        .recorder
        .create_draft(draft(StageKind::Liquidation, 100_000_00, "BL-1", "D-1", Some(&first.id.0)))
        .await
        .expect("draft");
    let liquidation =
        h.recorder.submit(&liquidation.id, "operator").await.expect("submit");
    assert_eq!(liquidation.document_number.as_deref(), Some("LIQ-2026-0001"));
}

#[tokio::test]
async fn every_decision_leaves_an_audit_event() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    h.recorder.submit(&record.id, "operator").await.expect("submit");
    approve_fully(&h, &record.id, StageKind::Engagement).await.expect("validate");

    let events = h.audit.events();
    let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions[0], "create_draft");
    assert_eq!(actions[1], "submit");
    assert_eq!(actions[2..].iter().filter(|a| **a == "approve").count(), 4);
    assert!(events.iter().all(|e| e.entity_id == record.id.0));
}

/// What a rival operator slips in just before our status flip lands.
enum Rival {
    Submit,
    Defer,
    FinalApproval,
}

/// Stage-record store that replays a rival operator's writes right before
/// the caller's own status flip, recreating the interleavings concurrent
/// offices produce.
struct ContendedRecords {
    inner: Arc<dyn StageRecordRepository>,
    lines: Arc<dyn BudgetLineRepository>,
    rival: Mutex<Option<Rival>>,
}

impl ContendedRecords {
    fn new(
        inner: Arc<dyn StageRecordRepository>,
        lines: Arc<dyn BudgetLineRepository>,
        rival: Rival,
    ) -> Arc<Self> {
        Arc::new(Self { inner, lines, rival: Mutex::new(Some(rival)) })
    }

    fn take_rival(&self) -> Option<Rival> {
        self.rival.lock().expect("rival lock").take()
    }
}

#[async_trait]
impl StageRecordRepository for ContendedRecords {
    async fn find_by_id(
        &self,
        id: &StageRecordId,
    ) -> Result<Option<StageRecord>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn save(&self, record: StageRecord) -> Result<(), RepositoryError> {
        self.inner.save(record).await
    }

    async fn list_by_dossier(
        &self,
        dossier_id: &DossierId,
    ) -> Result<Vec<StageRecord>, RepositoryError> {
        self.inner.list_by_dossier(dossier_id).await
    }

    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<StageRecord>, RepositoryError> {
        self.inner.list_by_year(fiscal_year).await
    }

    async fn transition_status(
        &self,
        id: &StageRecordId,
        from: StageStatus,
        from_step: usize,
        to: StageStatus,
        to_step: usize,
    ) -> Result<bool, RepositoryError> {
        if let Some(rival) = self.take_rival() {
            match rival {
                Rival::Submit => {
                    self.inner
                        .transition_status(id, StageStatus::Draft, from_step, StageStatus::Submitted, to_step)
                        .await?;
                }
                Rival::Defer => {
                    self.inner
                        .transition_status(id, StageStatus::Submitted, from_step, StageStatus::Deferred, from_step)
                        .await?;
                }
                Rival::FinalApproval => {
                    let record =
                        self.inner.find_by_id(id).await?.expect("contended record exists");
                    self.lines
                        .reserve(&record.budget_line_id, record.kind, record.amount)
                        .await?;
                    self.inner
                        .transition_status(id, StageStatus::Submitted, from_step, StageStatus::Validated, from_step)
                        .await?;
                    self.inner
                        .claim_step(
                            id,
                            from_step,
                            StepClaim::Validate { actor: "rival", at: Utc::now(), comments: None },
                        )
                        .await?;
                }
            }
        }
        self.inner.transition_status(id, from, from_step, to, to_step).await
    }

    async fn set_document_number(
        &self,
        id: &StageRecordId,
        document_number: &str,
    ) -> Result<(), RepositoryError> {
        self.inner.set_document_number(id, document_number).await
    }

    async fn set_deferral(
        &self,
        id: &StageRecordId,
        deferral: Option<&DeferralInfo>,
    ) -> Result<(), RepositoryError> {
        self.inner.set_deferral(id, deferral).await
    }

    async fn sum_by_predecessor(
        &self,
        predecessor_id: &StageRecordId,
        exclude: Option<&StageRecordId>,
    ) -> Result<Decimal, RepositoryError> {
        self.inner.sum_by_predecessor(predecessor_id, exclude).await
    }

    async fn insert_steps(&self, steps: &[ValidationStep]) -> Result<(), RepositoryError> {
        self.inner.insert_steps(steps).await
    }

    async fn steps_for(
        &self,
        record_id: &StageRecordId,
    ) -> Result<Vec<ValidationStep>, RepositoryError> {
        self.inner.steps_for(record_id).await
    }

    async fn claim_step(
        &self,
        record_id: &StageRecordId,
        position: usize,
        outcome: StepClaim<'_>,
    ) -> Result<bool, RepositoryError> {
        self.inner.claim_step(record_id, position, outcome).await
    }
}

/// Drives an engagement through its first three signatures, leaving only
/// the director general's final step pending.
async fn submitted_at_final_step(h: &common::Harness) -> StageRecordId {
    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 100_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    h.recorder.submit(&record.id, "operator").await.expect("submit");
    let circuit = approval_circuit(StageKind::Engagement);
    h.workflow.approve(&record.id, "fo", circuit[0], None).await.expect("step 1");
    h.workflow.approve(&record.id, "bc", circuit[1], None).await.expect("step 2");
    h.workflow.approve(&record.id, "ad", circuit[2], None).await.expect("step 3");
    record.id
}

#[tokio::test]
async fn a_deferral_landing_mid_final_approval_releases_the_reservation() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;
    let record_id = submitted_at_final_step(&h).await;
    let circuit = approval_circuit(StageKind::Engagement);

    let contended = ContendedRecords::new(h.records.clone(), h.lines.clone(), Rival::Defer);
    let engine = ValidationWorkflowEngine::new(
        contended,
        h.lines.clone(),
        h.tracker.clone(),
        Arc::new(h.audit.clone()),
    );
    let lost = engine
        .approve(&record_id, "dg", circuit[3], None)
        .await
        .expect_err("the deferral landed first");
    assert!(matches!(lost, CoreError::AlreadyProcessed(_)));

    // Nothing stays reserved for a record that is not validated.
    let line = h
        .lines
        .find_by_id(&BudgetLineId("BL-1".to_owned()))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(line.total_engage, Decimal::ZERO);
    let found = h.records.find_by_id(&record_id).await.expect("find").expect("exists");
    assert_eq!(found.status, StageStatus::Deferred);

    // The final step is still open: resume and approve complete the circuit.
    let steps = h.records.steps_for(&record_id).await.expect("steps");
    assert_eq!(steps[3].status, StepStatus::Pending);
    h.workflow.resume(&record_id, "dg").await.expect("resume");
    let validated =
        h.workflow.approve(&record_id, "dg", circuit[3], None).await.expect("step 4");
    assert_eq!(validated.status, StageStatus::Validated);

    let line = h
        .lines
        .find_by_id(&BudgetLineId("BL-1".to_owned()))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(line.total_engage, Decimal::new(100_000_00, 2));
}

#[tokio::test]
async fn a_lost_final_approval_race_releases_its_reservation() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;
    let record_id = submitted_at_final_step(&h).await;
    let circuit = approval_circuit(StageKind::Engagement);

    let contended =
        ContendedRecords::new(h.records.clone(), h.lines.clone(), Rival::FinalApproval);
    let engine = ValidationWorkflowEngine::new(
        contended,
        h.lines.clone(),
        h.tracker.clone(),
        Arc::new(h.audit.clone()),
    );
    let lost = engine
        .approve(&record_id, "dg-late", circuit[3], None)
        .await
        .expect_err("the rival signed first");
    assert!(matches!(lost, CoreError::AlreadyProcessed(_)));

    // Only the winner's reservation stands; the loser's was released.
    let line = h
        .lines
        .find_by_id(&BudgetLineId("BL-1".to_owned()))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(line.total_engage, Decimal::new(100_000_00, 2));

    let found = h.records.find_by_id(&record_id).await.expect("find").expect("exists");
    assert_eq!(found.status, StageStatus::Validated);
    let steps = h.records.steps_for(&record_id).await.expect("steps");
    assert_eq!(steps[3].validated_by.as_deref(), Some("rival"));
}

#[tokio::test]
async fn a_submit_losing_the_draft_race_draws_no_steps_or_number() {
    let h = harness().await;
    seed_line(&h, "BL-1", 2026, 1_000_000_00).await;
    seed_dossier(&h, "D-1", 2026, 100_000_00).await;

    let record = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 50_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");

    let contended = ContendedRecords::new(h.records.clone(), h.lines.clone(), Rival::Submit);
    let recorder = StageRecorder::new(
        h.lines.clone(),
        contended,
        h.dossiers.clone(),
        h.numbers.clone(),
        Arc::new(h.audit.clone()),
    );
    let lost = recorder.submit(&record.id, "operator").await.expect_err("rival submitted first");
    assert!(matches!(lost, CoreError::AlreadyProcessed(_)));
    assert!(h.records.steps_for(&record.id).await.expect("steps").is_empty());

    // The loser burned no ordinal: the next submission draws the first one.
    let fresh = h
        .recorder
        .create_draft(draft(StageKind::Engagement, 50_000_00, "BL-1", "D-1", None))
        .await
        .expect("draft");
    let fresh = h.recorder.submit(&fresh.id, "operator").await.expect("submit");
    assert_eq!(fresh.document_number.as_deref(), Some("ENG-2026-0001"));
}
