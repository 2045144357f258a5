use chrono::{DateTime, Utc};
use sqlx::Row;

use budgex_core::domain::dossier::{Dossier, DossierId};
use budgex_core::domain::stage::StageKind;

use super::{DossierRepository, RepositoryError};
use crate::money::{cents_to_decimal, decimal_to_cents};
use crate::DbPool;

pub struct SqlDossierRepository {
    pool: DbPool,
}

impl SqlDossierRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(e.to_string())
}

fn parse_datetime(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_dossier(row: &sqlx::sqlite::SqliteRow) -> Result<Dossier, RepositoryError> {
    let stage_str: String = row.try_get("current_stage").map_err(decode)?;
    let current_stage = StageKind::parse(&stage_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown stage `{stage_str}`")))?;
    let closed: i64 = row.try_get("closed").map_err(decode)?;
    let closed_at: Option<String> = row.try_get("closed_at").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(Dossier {
        id: DossierId(row.try_get("id").map_err(decode)?),
        reference: row.try_get("reference").map_err(decode)?,
        fiscal_year: row.try_get("fiscal_year").map_err(decode)?,
        montant_estime: cents_to_decimal(row.try_get("montant_estime_cents").map_err(decode)?),
        montant_engage: cents_to_decimal(row.try_get("montant_engage_cents").map_err(decode)?),
        montant_liquide: cents_to_decimal(row.try_get("montant_liquide_cents").map_err(decode)?),
        montant_ordonnance: cents_to_decimal(
            row.try_get("montant_ordonnance_cents").map_err(decode)?,
        ),
        montant_paye: cents_to_decimal(row.try_get("montant_paye_cents").map_err(decode)?),
        current_stage,
        closed: closed != 0,
        closed_at: closed_at.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

const SELECT_DOSSIER: &str = "SELECT id, reference, fiscal_year, montant_estime_cents,
        montant_engage_cents, montant_liquide_cents, montant_ordonnance_cents,
        montant_paye_cents, current_stage, closed, closed_at, created_at, updated_at
 FROM dossier";

#[async_trait::async_trait]
impl DossierRepository for SqlDossierRepository {
    async fn find_by_id(&self, id: &DossierId) -> Result<Option<Dossier>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_DOSSIER} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(ref r) => Ok(Some(row_to_dossier(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, dossier: Dossier) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO dossier (id, reference, fiscal_year, montant_estime_cents,
                                  montant_engage_cents, montant_liquide_cents,
                                  montant_ordonnance_cents, montant_paye_cents, current_stage,
                                  closed, closed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 reference = excluded.reference,
                 montant_estime_cents = excluded.montant_estime_cents,
                 montant_engage_cents = excluded.montant_engage_cents,
                 montant_liquide_cents = excluded.montant_liquide_cents,
                 montant_ordonnance_cents = excluded.montant_ordonnance_cents,
                 montant_paye_cents = excluded.montant_paye_cents,
                 current_stage = excluded.current_stage,
                 closed = excluded.closed,
                 closed_at = excluded.closed_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&dossier.id.0)
        .bind(&dossier.reference)
        .bind(dossier.fiscal_year)
        .bind(decimal_to_cents(dossier.montant_estime)?)
        .bind(decimal_to_cents(dossier.montant_engage)?)
        .bind(decimal_to_cents(dossier.montant_liquide)?)
        .bind(decimal_to_cents(dossier.montant_ordonnance)?)
        .bind(decimal_to_cents(dossier.montant_paye)?)
        .bind(dossier.current_stage.as_str())
        .bind(dossier.closed as i64)
        .bind(dossier.closed_at.map(|at| at.to_rfc3339()))
        .bind(dossier.created_at.to_rfc3339())
        .bind(dossier.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<Dossier>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query(&format!("{SELECT_DOSSIER} WHERE fiscal_year = ? ORDER BY reference"))
                .bind(fiscal_year)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_dossier).collect()
    }
}
