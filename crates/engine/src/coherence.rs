use std::sync::Arc;

use budgex_core::coherence::{self, CoherenceReport, FiscalSnapshot};
use budgex_core::CoreError;
use budgex_db::repositories::{
    ActivityRepository, BudgetLineRepository, StageRecordRepository,
};

/// Runs the coherence battery over one fiscal year.
///
/// The rules themselves are pure functions over an in-memory snapshot; this
/// service only assembles the snapshot from the store.
pub struct CoherenceChecker {
    activities: Arc<dyn ActivityRepository>,
    lines: Arc<dyn BudgetLineRepository>,
    records: Arc<dyn StageRecordRepository>,
}

impl CoherenceChecker {
    pub fn new(
        activities: Arc<dyn ActivityRepository>,
        lines: Arc<dyn BudgetLineRepository>,
        records: Arc<dyn StageRecordRepository>,
    ) -> Self {
        Self { activities, lines, records }
    }

    async fn snapshot(&self, fiscal_year: i32) -> Result<FiscalSnapshot, CoreError> {
        Ok(FiscalSnapshot {
            fiscal_year,
            activities: self.activities.list_by_year(fiscal_year).await?,
            lines: self.lines.list_by_year(fiscal_year).await?,
            records: self.records.list_by_year(fiscal_year).await?,
        })
    }

    /// Full report: every rule, every severity.
    pub async fn run(&self, fiscal_year: i32) -> Result<CoherenceReport, CoreError> {
        let snapshot = self.snapshot(fiscal_year).await?;
        let report = coherence::generate_report(&snapshot);
        tracing::info!(
            fiscal_year,
            errors = report.errors,
            warnings = report.warnings,
            "coherence sweep finished"
        );
        Ok(report)
    }

    /// Overrun-only sweep, cheap enough to run after every validation.
    pub async fn quick(&self, fiscal_year: i32) -> Result<CoherenceReport, CoreError> {
        let snapshot = self.snapshot(fiscal_year).await?;
        Ok(coherence::quick_check(&snapshot))
    }
}
