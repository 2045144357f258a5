use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::budget_line::BudgetLineId;
use crate::domain::dossier::DossierId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRecordId(pub String);

/// The four cascading financial stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Engagement,
    Liquidation,
    Ordonnancement,
    Reglement,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Engagement,
        StageKind::Liquidation,
        StageKind::Ordonnancement,
        StageKind::Reglement,
    ];

    /// Stage that must precede this one, if any.
    pub fn predecessor(self) -> Option<StageKind> {
        match self {
            StageKind::Engagement => None,
            StageKind::Liquidation => Some(StageKind::Engagement),
            StageKind::Ordonnancement => Some(StageKind::Liquidation),
            StageKind::Reglement => Some(StageKind::Ordonnancement),
        }
    }

    pub fn successor(self) -> Option<StageKind> {
        match self {
            StageKind::Engagement => Some(StageKind::Liquidation),
            StageKind::Liquidation => Some(StageKind::Ordonnancement),
            StageKind::Ordonnancement => Some(StageKind::Reglement),
            StageKind::Reglement => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Engagement => "engagement",
            StageKind::Liquidation => "liquidation",
            StageKind::Ordonnancement => "ordonnancement",
            StageKind::Reglement => "reglement",
        }
    }

    pub fn parse(value: &str) -> Option<StageKind> {
        match value {
            "engagement" => Some(StageKind::Engagement),
            "liquidation" => Some(StageKind::Liquidation),
            "ordonnancement" => Some(StageKind::Ordonnancement),
            "reglement" => Some(StageKind::Reglement),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Draft,
    Submitted,
    Validated,
    Rejected,
    Deferred,
    Cancelled,
}

impl StageStatus {
    /// Terminal statuses can no longer move through the workflow.
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Validated | StageStatus::Rejected | StageStatus::Cancelled)
    }

    /// Statuses whose amount counts against the ledger or a predecessor bound.
    pub fn consumes_amount(self) -> bool {
        !matches!(self, StageStatus::Rejected | StageStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Draft => "draft",
            StageStatus::Submitted => "submitted",
            StageStatus::Validated => "validated",
            StageStatus::Rejected => "rejected",
            StageStatus::Deferred => "deferred",
            StageStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<StageStatus> {
        match value {
            "draft" => Some(StageStatus::Draft),
            "submitted" => Some(StageStatus::Submitted),
            "validated" => Some(StageStatus::Validated),
            "rejected" => Some(StageStatus::Rejected),
            "deferred" => Some(StageStatus::Deferred),
            "cancelled" => Some(StageStatus::Cancelled),
            _ => None,
        }
    }
}

/// Metadata attached while a record sits in the deferred state. Cleared on
/// resume; the step index is untouched so the workflow picks up exactly
/// where it stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferralInfo {
    pub reason: String,
    pub resume_condition: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub deferred_by: String,
    pub deferred_at: DateTime<Utc>,
}

/// One financial-stage record. Engagement references its budget line
/// directly; the later stages reach it transitively through `predecessor_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: StageRecordId,
    pub kind: StageKind,
    pub document_number: Option<String>,
    pub amount: Decimal,
    pub fiscal_year: i32,
    pub status: StageStatus,
    /// 1-based index of the pending validation step; meaningful once
    /// submitted.
    pub current_step: usize,
    pub deferral: Option<DeferralInfo>,
    pub budget_line_id: BudgetLineId,
    pub predecessor_id: Option<StageRecordId>,
    pub dossier_id: DossierId,
    pub object: String,
    pub beneficiary: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StageRecord {
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}
