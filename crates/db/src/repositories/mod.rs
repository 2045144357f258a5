use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use budgex_core::domain::activity::Activity;
use budgex_core::domain::budget_line::{BudgetLine, BudgetLineId, WaterfallRow};
use budgex_core::domain::dossier::{Dossier, DossierId};
use budgex_core::domain::stage::{
    DeferralInfo, StageKind, StageRecord, StageRecordId, StageStatus,
};
use budgex_core::domain::step::ValidationStep;
use budgex_core::numbering::SequenceKey;

pub mod activity;
pub mod budget_line;
pub mod dossier;
pub mod sequence;
pub mod stage;

pub use activity::SqlActivityRepository;
pub use budget_line::SqlBudgetLineRepository;
pub use dossier::SqlDossierRepository;
pub use sequence::SqlSequenceRepository;
pub use stage::SqlStageRecordRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for budgex_core::CoreError {
    fn from(error: RepositoryError) -> Self {
        budgex_core::CoreError::Storage(error.to_string())
    }
}

/// Result of the authoritative conditional reserve. `Insufficient` carries
/// the line's state at refusal time so the caller can report the shortfall.
#[derive(Clone, Debug, PartialEq)]
pub enum ReserveOutcome {
    Applied,
    Insufficient { dotation: Decimal, total_engage: Decimal },
}

/// Organizational dimension for waterfall rollups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollupDimension {
    Direction,
    Mission,
    Objectif,
    Nomenclature,
}

impl RollupDimension {
    pub fn column(self) -> &'static str {
        match self {
            RollupDimension::Direction => "direction",
            RollupDimension::Mission => "mission",
            RollupDimension::Objectif => "objectif",
            RollupDimension::Nomenclature => "nomenclature",
        }
    }
}

#[async_trait]
pub trait BudgetLineRepository: Send + Sync {
    async fn find_by_id(&self, id: &BudgetLineId) -> Result<Option<BudgetLine>, RepositoryError>;
    async fn save(&self, line: BudgetLine) -> Result<(), RepositoryError>;
    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<BudgetLine>, RepositoryError>;

    /// Sum of non-cancelled, non-rejected engagement amounts on the line for
    /// one fiscal year, optionally excluding the record being edited. Feeds
    /// the advisory availability check.
    async fn sum_engagements(
        &self,
        line_id: &BudgetLineId,
        fiscal_year: i32,
        exclude: Option<&StageRecordId>,
    ) -> Result<Decimal, RepositoryError>;

    /// Authoritative reservation: one conditional UPDATE that adds `amount`
    /// to the running total for `kind`, refusing the engagement increment if
    /// it would push `total_engage` past the dotation. Never read-then-write.
    async fn reserve(
        &self,
        line_id: &BudgetLineId,
        kind: StageKind,
        amount: Decimal,
    ) -> Result<ReserveOutcome, RepositoryError>;

    /// Inverse of `reserve`, used by cancellation of a validated record.
    async fn release(
        &self,
        line_id: &BudgetLineId,
        kind: StageKind,
        amount: Decimal,
    ) -> Result<(), RepositoryError>;

    async fn waterfall_by_line(
        &self,
        fiscal_year: i32,
    ) -> Result<Vec<WaterfallRow>, RepositoryError>;

    async fn waterfall_rollup(
        &self,
        fiscal_year: i32,
        dimension: RollupDimension,
    ) -> Result<Vec<WaterfallRow>, RepositoryError>;
}

#[async_trait]
pub trait StageRecordRepository: Send + Sync {
    async fn find_by_id(&self, id: &StageRecordId)
        -> Result<Option<StageRecord>, RepositoryError>;
    async fn save(&self, record: StageRecord) -> Result<(), RepositoryError>;
    async fn list_by_dossier(
        &self,
        dossier_id: &DossierId,
    ) -> Result<Vec<StageRecord>, RepositoryError>;
    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<StageRecord>, RepositoryError>;

    /// Conditional status flip keyed on the expected status and step pair.
    /// At most one writer can move the record out of a given pair; the
    /// losers see false and callers translate that into `AlreadyProcessed`.
    async fn transition_status(
        &self,
        id: &StageRecordId,
        from: StageStatus,
        from_step: usize,
        to: StageStatus,
        to_step: usize,
    ) -> Result<bool, RepositoryError>;

    async fn set_document_number(
        &self,
        id: &StageRecordId,
        document_number: &str,
    ) -> Result<(), RepositoryError>;

    async fn set_deferral(
        &self,
        id: &StageRecordId,
        deferral: Option<&DeferralInfo>,
    ) -> Result<(), RepositoryError>;

    /// Sum of non-cancelled, non-rejected successor amounts hanging off one
    /// predecessor. Bounds the next stage's amount.
    async fn sum_by_predecessor(
        &self,
        predecessor_id: &StageRecordId,
        exclude: Option<&StageRecordId>,
    ) -> Result<Decimal, RepositoryError>;

    async fn insert_steps(&self, steps: &[ValidationStep]) -> Result<(), RepositoryError>;
    async fn steps_for(
        &self,
        record_id: &StageRecordId,
    ) -> Result<Vec<ValidationStep>, RepositoryError>;

    /// First-writer-wins claim of a pending step. Marks it validated or
    /// rejected; returns false if the step was no longer pending.
    async fn claim_step(
        &self,
        record_id: &StageRecordId,
        position: usize,
        outcome: StepClaim<'_>,
    ) -> Result<bool, RepositoryError>;
}

/// How a pending step is being claimed.
#[derive(Clone, Copy, Debug)]
pub enum StepClaim<'a> {
    Validate { actor: &'a str, at: DateTime<Utc>, comments: Option<&'a str> },
    Reject { actor: &'a str, at: DateTime<Utc>, reason: &'a str },
}

#[async_trait]
pub trait DossierRepository: Send + Sync {
    async fn find_by_id(&self, id: &DossierId) -> Result<Option<Dossier>, RepositoryError>;
    async fn save(&self, dossier: Dossier) -> Result<(), RepositoryError>;
    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<Dossier>, RepositoryError>;
}

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// Draw the next ordinal for a counter tuple in a single atomic
    /// round trip. Ordinals start at 1 and are dense per tuple.
    async fn next_ordinal(&self, key: &SequenceKey) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn save(&self, activity: Activity) -> Result<(), RepositoryError>;
    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<Activity>, RepositoryError>;
}
