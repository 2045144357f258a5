use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::stage::StageKind;
use crate::errors::CoreError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DossierId(pub String);

/// Case file aggregating one originating request's full stage chain.
///
/// The per-stage amounts are denormalized by the chain tracker from the
/// underlying stage records; they always satisfy
/// `paye <= ordonnance <= liquide <= engage`, with equality at closure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dossier {
    pub id: DossierId,
    pub reference: String,
    pub fiscal_year: i32,
    pub montant_estime: Decimal,
    pub montant_engage: Decimal,
    pub montant_liquide: Decimal,
    pub montant_ordonnance: Decimal,
    pub montant_paye: Decimal,
    pub current_stage: StageKind,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dossier {
    pub fn new(
        id: DossierId,
        reference: impl Into<String>,
        fiscal_year: i32,
        montant_estime: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            reference: reference.into(),
            fiscal_year,
            montant_estime,
            montant_engage: Decimal::ZERO,
            montant_liquide: Decimal::ZERO,
            montant_ordonnance: Decimal::ZERO,
            montant_paye: Decimal::ZERO,
            current_stage: StageKind::Engagement,
            closed: false,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn amount_for(&self, kind: StageKind) -> Decimal {
        match kind {
            StageKind::Engagement => self.montant_engage,
            StageKind::Liquidation => self.montant_liquide,
            StageKind::Ordonnancement => self.montant_ordonnance,
            StageKind::Reglement => self.montant_paye,
        }
    }

    /// Check the cascade ordering invariant over the denormalized amounts.
    pub fn amounts_ordered(&self) -> bool {
        self.montant_paye <= self.montant_ordonnance
            && self.montant_ordonnance <= self.montant_liquide
            && self.montant_liquide <= self.montant_engage
    }

    /// A dossier may close once every committed franc has been paid out.
    /// Open stage records are the caller's check; this only looks at the
    /// amounts.
    pub fn closure_eligible(&self) -> bool {
        self.montant_engage > Decimal::ZERO && self.montant_paye == self.montant_engage
    }

    /// Mark closed. Idempotent: a second call keeps the original timestamp.
    pub fn close(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.closed {
            return Ok(());
        }
        if !self.closure_eligible() {
            return Err(CoreError::validation(format!(
                "dossier {} not eligible for closure: paye {} != engage {}",
                self.reference, self.montant_paye, self.montant_engage
            )));
        }
        self.closed = true;
        self.closed_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Dossier, DossierId};
    use crate::domain::stage::StageKind;
    use crate::errors::CoreError;

    fn dossier() -> Dossier {
        Dossier::new(
            DossierId("D-1".to_owned()),
            "REQ-2026-017",
            2026,
            Decimal::new(500_000_00, 2),
        )
    }

    #[test]
    fn fresh_dossier_starts_at_engagement_and_ordered() {
        let dossier = dossier();
        assert_eq!(dossier.current_stage, StageKind::Engagement);
        assert!(dossier.amounts_ordered());
        assert!(!dossier.closure_eligible());
    }

    #[test]
    fn cascade_ordering_detects_violation() {
        let mut dossier = dossier();
        dossier.montant_engage = Decimal::new(100_00, 2);
        dossier.montant_liquide = Decimal::new(150_00, 2);
        assert!(!dossier.amounts_ordered());
    }

    #[test]
    fn close_requires_paye_equal_engage() {
        let mut dossier = dossier();
        dossier.montant_engage = Decimal::new(100_00, 2);
        dossier.montant_paye = Decimal::new(60_00, 2);

        let error = dossier.close(Utc::now()).expect_err("must refuse");
        assert!(matches!(error, CoreError::Validation(_)));
        assert!(!dossier.closed);
    }

    #[test]
    fn close_is_idempotent_and_keeps_first_timestamp() {
        let mut dossier = dossier();
        let amount = Decimal::new(100_00, 2);
        dossier.montant_engage = amount;
        dossier.montant_liquide = amount;
        dossier.montant_ordonnance = amount;
        dossier.montant_paye = amount;

        let first = Utc::now();
        dossier.close(first).expect("close");
        let recorded = dossier.closed_at;

        dossier.close(Utc::now()).expect("second close is a no-op");
        assert_eq!(dossier.closed_at, recorded);
        assert!(dossier.closed);
    }
}
