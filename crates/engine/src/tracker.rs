use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use budgex_core::domain::dossier::{Dossier, DossierId};
use budgex_core::domain::stage::{StageKind, StageStatus};
use budgex_core::CoreError;
use budgex_db::repositories::{DossierRepository, StageRecordRepository};

/// Keeps dossier-level execution rollups in line with their stage records.
///
/// The per-stage montants count validated records only; drafts, rejections
/// and cancellations never show up in a dossier total. A dossier whose
/// payments have caught up with its engagements closes itself on refresh.
pub struct DossierChainTracker {
    dossiers: Arc<dyn DossierRepository>,
    records: Arc<dyn StageRecordRepository>,
}

impl DossierChainTracker {
    pub fn new(
        dossiers: Arc<dyn DossierRepository>,
        records: Arc<dyn StageRecordRepository>,
    ) -> Self {
        Self { dossiers, records }
    }

    /// Recompute the dossier's montants and current stage from its records.
    pub async fn refresh(&self, dossier_id: &DossierId) -> Result<Dossier, CoreError> {
        let mut dossier = self
            .dossiers
            .find_by_id(dossier_id)
            .await?
            .ok_or_else(|| CoreError::referential("dossier", dossier_id.0.clone()))?;

        let records = self.records.list_by_dossier(dossier_id).await?;

        let mut totals = [Decimal::ZERO; 4];
        let mut furthest = StageKind::Engagement;
        let mut any_open = false;
        for record in &records {
            if record.is_open() {
                any_open = true;
            }
            if record.status != StageStatus::Validated {
                continue;
            }
            let slot = match record.kind {
                StageKind::Engagement => 0,
                StageKind::Liquidation => 1,
                StageKind::Ordonnancement => 2,
                StageKind::Reglement => 3,
            };
            totals[slot] += record.amount;
            if slot >= furthest as usize {
                furthest = record.kind;
            }
        }

        dossier.montant_engage = totals[0];
        dossier.montant_liquide = totals[1];
        dossier.montant_ordonnance = totals[2];
        dossier.montant_paye = totals[3];
        dossier.current_stage = furthest;
        dossier.updated_at = Utc::now();

        if dossier.closure_eligible() && !any_open {
            dossier.close(Utc::now())?;
        }

        self.dossiers.save(dossier.clone()).await?;
        tracing::debug!(
            dossier_id = %dossier_id.0,
            stage = dossier.current_stage.as_str(),
            closed = dossier.closed,
            "dossier refreshed"
        );
        Ok(dossier)
    }

    /// Explicit closure. Only legal once every stage record is terminal and
    /// payments have caught up with engagements; calling it on an already
    /// closed dossier is a no-op that keeps the original timestamp.
    pub async fn close(&self, dossier_id: &DossierId) -> Result<Dossier, CoreError> {
        let mut dossier = self
            .dossiers
            .find_by_id(dossier_id)
            .await?
            .ok_or_else(|| CoreError::referential("dossier", dossier_id.0.clone()))?;
        if dossier.closed {
            return Ok(dossier);
        }

        if !dossier.closure_eligible() {
            return Err(CoreError::validation(format!(
                "dossier `{}` cannot close: paid {} does not match engaged {}",
                dossier.reference, dossier.montant_paye, dossier.montant_engage
            )));
        }
        let records = self.records.list_by_dossier(dossier_id).await?;
        if let Some(open) = records.iter().find(|record| record.is_open()) {
            return Err(CoreError::validation(format!(
                "dossier `{}` cannot close: record `{}` is still {}",
                dossier.reference,
                open.id.0,
                open.status.as_str()
            )));
        }

        dossier.close(Utc::now())?;
        self.dossiers.save(dossier.clone()).await?;
        tracing::info!(dossier_id = %dossier_id.0, "dossier closed");
        Ok(dossier)
    }

    /// Full chain view: the dossier plus its stage records ordered by
    /// creation time.
    pub async fn chain(
        &self,
        dossier_id: &DossierId,
    ) -> Result<(Dossier, Vec<budgex_core::domain::stage::StageRecord>), CoreError> {
        let dossier = self
            .dossiers
            .find_by_id(dossier_id)
            .await?
            .ok_or_else(|| CoreError::referential("dossier", dossier_id.0.clone()))?;
        let records = self.records.list_by_dossier(dossier_id).await?;
        Ok((dossier, records))
    }
}
