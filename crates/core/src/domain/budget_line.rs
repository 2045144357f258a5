use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::stage::StageKind;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetLineId(pub String);

/// One budget line: the allotment (dotation) plus the four running totals
/// maintained by the ledger as stage records reach their validated state.
///
/// The running totals are only ever mutated through the ledger's
/// reserve/release path; everything else reads them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub id: BudgetLineId,
    pub fiscal_year: i32,
    pub code: String,
    pub label: String,
    pub direction: Option<String>,
    pub mission: Option<String>,
    pub objectif: Option<String>,
    pub nomenclature: Option<String>,
    pub dotation_initiale: Decimal,
    pub dotation_modifiee: Decimal,
    pub total_engage: Decimal,
    pub total_liquide: Decimal,
    pub total_ordonnance: Decimal,
    pub total_paye: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetLine {
    pub fn new(
        id: BudgetLineId,
        fiscal_year: i32,
        code: impl Into<String>,
        label: impl Into<String>,
        dotation_initiale: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            fiscal_year,
            code: code.into(),
            label: label.into(),
            direction: None,
            mission: None,
            objectif: None,
            nomenclature: None,
            dotation_initiale,
            dotation_modifiee: dotation_initiale,
            total_engage: Decimal::ZERO,
            total_liquide: Decimal::ZERO,
            total_ordonnance: Decimal::ZERO,
            total_paye: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective allotment. Transfers adjust `dotation_modifiee`, which is
    /// what every availability computation runs against.
    pub fn dotation(&self) -> Decimal {
        self.dotation_modifiee
    }

    pub fn total_for(&self, kind: StageKind) -> Decimal {
        match kind {
            StageKind::Engagement => self.total_engage,
            StageKind::Liquidation => self.total_liquide,
            StageKind::Ordonnancement => self.total_ordonnance,
            StageKind::Reglement => self.total_paye,
        }
    }

    pub fn available(&self) -> Decimal {
        self.dotation() - self.total_engage
    }
}

/// Advisory availability computation for a proposed engagement amount.
///
/// `prior_commitments` is supplied by the caller as the sum of non-cancelled
/// engagements on the line, excluding the record being edited if any. The
/// authoritative check happens again inside the reserve statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    pub dotation: Decimal,
    pub prior_commitments: Decimal,
    pub cumulative: Decimal,
    pub available: Decimal,
    pub sufficient: bool,
}

impl AvailabilityCheck {
    pub fn compute(dotation: Decimal, prior_commitments: Decimal, proposed: Decimal) -> Self {
        let cumulative = prior_commitments + proposed;
        let available = dotation - cumulative;
        Self {
            dotation,
            prior_commitments,
            cumulative,
            available,
            sufficient: available >= Decimal::ZERO,
        }
    }

    /// What is left on the line before the proposed amount.
    pub fn headroom(&self) -> Decimal {
        self.dotation - self.prior_commitments
    }
}

/// One row of the dotation → engagé → liquidé → ordonnancé → payé waterfall,
/// either a single line or a rollup over an organizational dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaterfallRow {
    pub key: String,
    pub label: String,
    pub dotation: Decimal,
    pub engage: Decimal,
    pub liquide: Decimal,
    pub ordonnance: Decimal,
    pub paye: Decimal,
}

impl WaterfallRow {
    pub fn disponible(&self) -> Decimal {
        self.dotation - self.engage
    }
}
