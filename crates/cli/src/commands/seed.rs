use std::sync::Arc;

use rust_decimal::Decimal;

use budgex_core::audit::TracingAuditSink;
use budgex_core::config::{AppConfig, LoadOptions};
use budgex_core::domain::activity::{Activity, ActivityId};
use budgex_core::domain::budget_line::{BudgetLine, BudgetLineId};
use budgex_core::domain::dossier::{Dossier, DossierId};
use budgex_core::domain::stage::{StageKind, StageRecordId};
use budgex_core::domain::step::approval_circuit;
use budgex_core::CoreError;
use budgex_db::repositories::{
    ActivityRepository, BudgetLineRepository, DossierRepository, SqlActivityRepository,
    SqlBudgetLineRepository, SqlDossierRepository, SqlSequenceRepository,
    SqlStageRecordRepository,
};
use budgex_db::{connect_with_settings, migrations, DbPool};
use budgex_engine::{
    DocumentNumberService, DossierChainTracker, NewStageRecord, StageRecorder,
    ValidationWorkflowEngine,
};

use crate::commands::CommandResult;

const SEED_YEAR: i32 = 2026;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let summary = seed_demo_year(&pool, &config)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(summary)
    });

    match result {
        Ok(summary) => CommandResult::success("seed", summary),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

/// One fiscal year of demo data: two budget lines, two activities, and a
/// dossier whose engagement and first liquidation are fully validated.
async fn seed_demo_year(pool: &DbPool, config: &AppConfig) -> Result<String, CoreError> {
    let lines: Arc<dyn BudgetLineRepository> =
        Arc::new(SqlBudgetLineRepository::new(pool.clone()));
    let records = Arc::new(SqlStageRecordRepository::new(pool.clone()));
    let dossiers: Arc<dyn DossierRepository> = Arc::new(SqlDossierRepository::new(pool.clone()));
    let activities: Arc<dyn ActivityRepository> =
        Arc::new(SqlActivityRepository::new(pool.clone()));
    let sequences = Arc::new(SqlSequenceRepository::new(pool.clone()));

    let numbers =
        Arc::new(DocumentNumberService::new(sequences, config.numbering.clone()));
    let tracker = Arc::new(DossierChainTracker::new(dossiers.clone(), records.clone()));
    let audit = Arc::new(TracingAuditSink);
    let recorder = StageRecorder::new(
        lines.clone(),
        records.clone(),
        dossiers.clone(),
        numbers,
        audit.clone(),
    );
    let workflow =
        ValidationWorkflowEngine::new(records.clone(), lines.clone(), tracker, audit);

    // Re-running the command must not double up the demo chain.
    if dossiers
        .find_by_id(&DossierId("demo-dossier-lycee".to_owned()))
        .await?
        .is_some()
    {
        return Ok(format!("demo fiscal year {SEED_YEAR} already loaded, nothing to do"));
    }

    let mut line_construction = BudgetLine::new(
        BudgetLineId("demo-ligne-construction".to_owned()),
        SEED_YEAR,
        "611.01",
        "Construction d'infrastructures scolaires",
        Decimal::new(1_000_000_00, 2),
    );
    line_construction.direction = Some("DAF".to_owned());
    line_construction.mission = Some("Education".to_owned());
    lines.save(line_construction).await?;

    let mut line_entretien = BudgetLine::new(
        BudgetLineId("demo-ligne-entretien".to_owned()),
        SEED_YEAR,
        "611.02",
        "Entretien du réseau routier",
        Decimal::new(400_000_00, 2),
    );
    line_entretien.direction = Some("DIR".to_owned());
    line_entretien.mission = Some("Infrastructures".to_owned());
    lines.save(line_entretien).await?;

    activities
        .save(Activity {
            id: ActivityId("demo-act-ecoles".to_owned()),
            fiscal_year: SEED_YEAR,
            code: "A-01".to_owned(),
            label: "Programme de construction d'écoles".to_owned(),
            program_code: Some("P-100".to_owned()),
        })
        .await?;
    activities
        .save(Activity {
            id: ActivityId("demo-act-routes".to_owned()),
            fiscal_year: SEED_YEAR,
            code: "A-02".to_owned(),
            label: "Entretien routier".to_owned(),
            program_code: Some("P-200".to_owned()),
        })
        .await?;

    dossiers
        .save(Dossier::new(
            DossierId("demo-dossier-lycee".to_owned()),
            "REQ-2026-001",
            SEED_YEAR,
            Decimal::new(700_000_00, 2),
        ))
        .await?;

    let engagement = run_chain_stage(
        &recorder,
        &workflow,
        StageKind::Engagement,
        Decimal::new(700_000_00, 2),
        None,
    )
    .await?;
    let liquidation = run_chain_stage(
        &recorder,
        &workflow,
        StageKind::Liquidation,
        Decimal::new(250_000_00, 2),
        Some(engagement.clone()),
    )
    .await?;

    Ok(format!(
        "demo fiscal year {SEED_YEAR} loaded: 2 budget lines, 2 activities, \
         1 dossier with validated engagement {} and liquidation {}",
        engagement.0, liquidation.0
    ))
}

async fn run_chain_stage(
    recorder: &StageRecorder,
    workflow: &ValidationWorkflowEngine,
    kind: StageKind,
    amount: Decimal,
    predecessor: Option<StageRecordId>,
) -> Result<StageRecordId, CoreError> {
    let record = recorder
        .create_draft(NewStageRecord {
            kind,
            fiscal_year: SEED_YEAR,
            amount,
            budget_line_id: BudgetLineId("demo-ligne-construction".to_owned()),
            dossier_id: DossierId("demo-dossier-lycee".to_owned()),
            predecessor_id: predecessor,
            object: "Construction du lycée de la commune III".to_owned(),
            beneficiary: Some("BTP Sahel SARL".to_owned()),
            created_by: "demo-operator".to_owned(),
        })
        .await?;
    recorder.submit(&record.id, "demo-operator").await?;
    for (index, role) in approval_circuit(kind).iter().enumerate() {
        workflow
            .approve(&record.id, &format!("demo-approver-{index}"), *role, None)
            .await?;
    }
    Ok(record.id)
}
