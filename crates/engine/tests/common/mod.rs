use std::sync::Arc;

use rust_decimal::Decimal;

use budgex_core::audit::InMemoryAuditSink;
use budgex_core::config::NumberingConfig;
use budgex_core::domain::budget_line::{BudgetLine, BudgetLineId};
use budgex_core::domain::dossier::{Dossier, DossierId};
use budgex_core::domain::stage::{StageKind, StageRecord, StageRecordId};
use budgex_core::domain::step::approval_circuit;
use budgex_core::CoreError;
use budgex_db::repositories::{
    ActivityRepository, BudgetLineRepository, DossierRepository, SqlActivityRepository,
    SqlBudgetLineRepository, SqlDossierRepository, SqlSequenceRepository,
    SqlStageRecordRepository, StageRecordRepository,
};
use budgex_engine::{
    CoherenceChecker, DocumentNumberService, DossierChainTracker, NewStageRecord, StageRecorder,
    ValidationWorkflowEngine,
};

pub struct Harness {
    pub lines: Arc<dyn BudgetLineRepository>,
    pub records: Arc<dyn StageRecordRepository>,
    pub dossiers: Arc<dyn DossierRepository>,
    pub activities: Arc<dyn ActivityRepository>,
    pub recorder: StageRecorder,
    pub workflow: ValidationWorkflowEngine,
    pub numbers: Arc<DocumentNumberService>,
    pub tracker: Arc<DossierChainTracker>,
    pub checker: CoherenceChecker,
    pub audit: InMemoryAuditSink,
}

pub async fn harness() -> Harness {
    let pool = budgex_db::connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .expect("connect");
    budgex_db::migrations::run_pending(&pool).await.expect("migrations");

    let lines: Arc<dyn BudgetLineRepository> =
        Arc::new(SqlBudgetLineRepository::new(pool.clone()));
    let records: Arc<dyn StageRecordRepository> =
        Arc::new(SqlStageRecordRepository::new(pool.clone()));
    let dossiers: Arc<dyn DossierRepository> = Arc::new(SqlDossierRepository::new(pool.clone()));
    let activities: Arc<dyn ActivityRepository> =
        Arc::new(SqlActivityRepository::new(pool.clone()));
    let sequences = Arc::new(SqlSequenceRepository::new(pool.clone()));

    let audit = InMemoryAuditSink::default();
    let numbers =
        Arc::new(DocumentNumberService::new(sequences, NumberingConfig::default()));
    let tracker = Arc::new(DossierChainTracker::new(dossiers.clone(), records.clone()));

    let recorder = StageRecorder::new(
        lines.clone(),
        records.clone(),
        dossiers.clone(),
        numbers.clone(),
        Arc::new(audit.clone()),
    );
    let workflow = ValidationWorkflowEngine::new(
        records.clone(),
        lines.clone(),
        tracker.clone(),
        Arc::new(audit.clone()),
    );
    let checker = CoherenceChecker::new(activities.clone(), lines.clone(), records.clone());

    Harness { lines, records, dossiers, activities, recorder, workflow, numbers, tracker, checker, audit }
}

pub fn euros(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub async fn seed_line(h: &Harness, id: &str, fiscal_year: i32, dotation_cents: i64) {
    h.lines
        .save(BudgetLine::new(
            BudgetLineId(id.to_owned()),
            fiscal_year,
            format!("611.{id}"),
            format!("Ligne {id}"),
            euros(dotation_cents),
        ))
        .await
        .expect("seed line");
}

pub async fn seed_dossier(h: &Harness, id: &str, fiscal_year: i32, estimate_cents: i64) {
    h.dossiers
        .save(Dossier::new(
            DossierId(id.to_owned()),
            format!("REQ-{id}"),
            fiscal_year,
            euros(estimate_cents),
        ))
        .await
        .expect("seed dossier");
}

pub fn draft(
    kind: StageKind,
    amount_cents: i64,
    line: &str,
    dossier: &str,
    predecessor: Option<&str>,
) -> NewStageRecord {
    NewStageRecord {
        kind,
        fiscal_year: 2026,
        amount: euros(amount_cents),
        budget_line_id: BudgetLineId(line.to_owned()),
        dossier_id: DossierId(dossier.to_owned()),
        predecessor_id: predecessor.map(|p| StageRecordId(p.to_owned())),
        object: format!("{} de test", kind.as_str()),
        beneficiary: Some("ACME SARL".to_owned()),
        created_by: "operator".to_owned(),
    }
}

/// Walk the whole approval circuit for a submitted record.
pub async fn approve_fully(
    h: &Harness,
    record_id: &StageRecordId,
    kind: StageKind,
) -> Result<StageRecord, CoreError> {
    let mut last = None;
    for (index, role) in approval_circuit(kind).iter().enumerate() {
        last = Some(
            h.workflow
                .approve(record_id, &format!("approver-{index}"), *role, None)
                .await?,
        );
    }
    Ok(last.expect("circuit has steps"))
}

/// Draft, submit and fully approve a record, returning its final state.
pub async fn run_to_validated(
    h: &Harness,
    input: NewStageRecord,
) -> Result<StageRecord, CoreError> {
    let kind = input.kind;
    let record = h.recorder.create_draft(input).await?;
    h.recorder.submit(&record.id, "operator").await?;
    approve_fully(h, &record.id, kind).await
}
