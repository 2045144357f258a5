use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use budgex_core::domain::budget_line::{BudgetLine, BudgetLineId, WaterfallRow};
use budgex_core::domain::stage::{StageKind, StageRecordId};

use super::{BudgetLineRepository, RepositoryError, ReserveOutcome, RollupDimension};
use crate::money::{cents_to_decimal, decimal_to_cents};
use crate::DbPool;

pub struct SqlBudgetLineRepository {
    pool: DbPool,
}

impl SqlBudgetLineRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn total_column(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Engagement => "total_engage_cents",
        StageKind::Liquidation => "total_liquide_cents",
        StageKind::Ordonnancement => "total_ordonnance_cents",
        StageKind::Reglement => "total_paye_cents",
    }
}

fn parse_datetime(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_line(row: &sqlx::sqlite::SqliteRow) -> Result<BudgetLine, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(BudgetLine {
        id: BudgetLineId(row.try_get("id").map_err(decode)?),
        fiscal_year: row.try_get("fiscal_year").map_err(decode)?,
        code: row.try_get("code").map_err(decode)?,
        label: row.try_get("label").map_err(decode)?,
        direction: row.try_get("direction").map_err(decode)?,
        mission: row.try_get("mission").map_err(decode)?,
        objectif: row.try_get("objectif").map_err(decode)?,
        nomenclature: row.try_get("nomenclature").map_err(decode)?,
        dotation_initiale: cents_to_decimal(
            row.try_get("dotation_initiale_cents").map_err(decode)?,
        ),
        dotation_modifiee: cents_to_decimal(
            row.try_get("dotation_modifiee_cents").map_err(decode)?,
        ),
        total_engage: cents_to_decimal(row.try_get("total_engage_cents").map_err(decode)?),
        total_liquide: cents_to_decimal(row.try_get("total_liquide_cents").map_err(decode)?),
        total_ordonnance: cents_to_decimal(
            row.try_get("total_ordonnance_cents").map_err(decode)?,
        ),
        total_paye: cents_to_decimal(row.try_get("total_paye_cents").map_err(decode)?),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

const SELECT_LINE: &str = "SELECT id, fiscal_year, code, label, direction, mission, objectif,
        nomenclature, dotation_initiale_cents, dotation_modifiee_cents, total_engage_cents,
        total_liquide_cents, total_ordonnance_cents, total_paye_cents, created_at, updated_at
 FROM budget_line";

#[async_trait::async_trait]
impl BudgetLineRepository for SqlBudgetLineRepository {
    async fn find_by_id(&self, id: &BudgetLineId) -> Result<Option<BudgetLine>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_LINE} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(ref r) => Ok(Some(row_to_line(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, line: BudgetLine) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO budget_line (id, fiscal_year, code, label, direction, mission, objectif,
                                      nomenclature, dotation_initiale_cents,
                                      dotation_modifiee_cents, total_engage_cents,
                                      total_liquide_cents, total_ordonnance_cents,
                                      total_paye_cents, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 label = excluded.label,
                 direction = excluded.direction,
                 mission = excluded.mission,
                 objectif = excluded.objectif,
                 nomenclature = excluded.nomenclature,
                 dotation_initiale_cents = excluded.dotation_initiale_cents,
                 dotation_modifiee_cents = excluded.dotation_modifiee_cents,
                 updated_at = excluded.updated_at",
        )
        .bind(&line.id.0)
        .bind(line.fiscal_year)
        .bind(&line.code)
        .bind(&line.label)
        .bind(&line.direction)
        .bind(&line.mission)
        .bind(&line.objectif)
        .bind(&line.nomenclature)
        .bind(decimal_to_cents(line.dotation_initiale)?)
        .bind(decimal_to_cents(line.dotation_modifiee)?)
        .bind(decimal_to_cents(line.total_engage)?)
        .bind(decimal_to_cents(line.total_liquide)?)
        .bind(decimal_to_cents(line.total_ordonnance)?)
        .bind(decimal_to_cents(line.total_paye)?)
        .bind(line.created_at.to_rfc3339())
        .bind(line.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<BudgetLine>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query(&format!("{SELECT_LINE} WHERE fiscal_year = ? ORDER BY code"))
                .bind(fiscal_year)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_line).collect()
    }

    async fn sum_engagements(
        &self,
        line_id: &BudgetLineId,
        fiscal_year: i32,
        exclude: Option<&StageRecordId>,
    ) -> Result<Decimal, RepositoryError> {
        let excluded = exclude.map(|id| id.0.as_str()).unwrap_or("");
        let total: i64 = sqlx::query(
            "SELECT COALESCE(SUM(amount_cents), 0) AS total
             FROM stage_record
             WHERE budget_line_id = ? AND kind = 'engagement' AND fiscal_year = ?
               AND status NOT IN ('rejected', 'cancelled')
               AND id <> ?",
        )
        .bind(&line_id.0)
        .bind(fiscal_year)
        .bind(excluded)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(cents_to_decimal(total))
    }

    async fn reserve(
        &self,
        line_id: &BudgetLineId,
        kind: StageKind,
        amount: Decimal,
    ) -> Result<ReserveOutcome, RepositoryError> {
        let cents = decimal_to_cents(amount)?;
        let now = Utc::now().to_rfc3339();
        let column = total_column(kind);

        // For engagements the availability condition rides inside the
        // UPDATE, so the check and the increment are one statement and the
        // earlier advisory check can never be trusted into an overrun.
        let query = if kind == StageKind::Engagement {
            format!(
                "UPDATE budget_line
                 SET {column} = {column} + ?1, updated_at = ?2
                 WHERE id = ?3 AND {column} + ?1 <= dotation_modifiee_cents"
            )
        } else {
            format!(
                "UPDATE budget_line SET {column} = {column} + ?1, updated_at = ?2 WHERE id = ?3"
            )
        };

        let affected = sqlx::query(&query)
            .bind(cents)
            .bind(&now)
            .bind(&line_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 1 {
            return Ok(ReserveOutcome::Applied);
        }

        // Either the line is missing or the condition refused the increment;
        // read it back to tell the two apart and report the shortfall.
        let line = self.find_by_id(line_id).await?.ok_or(sqlx::Error::RowNotFound)?;
        Ok(ReserveOutcome::Insufficient {
            dotation: line.dotation(),
            total_engage: line.total_engage,
        })
    }

    async fn release(
        &self,
        line_id: &BudgetLineId,
        kind: StageKind,
        amount: Decimal,
    ) -> Result<(), RepositoryError> {
        let cents = decimal_to_cents(amount)?;
        let now = Utc::now().to_rfc3339();
        let column = total_column(kind);

        let affected = sqlx::query(&format!(
            "UPDATE budget_line SET {column} = {column} - ?1, updated_at = ?2 WHERE id = ?3"
        ))
        .bind(cents)
        .bind(&now)
        .bind(&line_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }
        Ok(())
    }

    async fn waterfall_by_line(
        &self,
        fiscal_year: i32,
    ) -> Result<Vec<WaterfallRow>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT code AS key, label, dotation_modifiee_cents AS dotation,
                    total_engage_cents AS engage, total_liquide_cents AS liquide,
                    total_ordonnance_cents AS ordonnance, total_paye_cents AS paye
             FROM budget_line WHERE fiscal_year = ? ORDER BY code",
        )
        .bind(fiscal_year)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_waterfall).collect()
    }

    async fn waterfall_rollup(
        &self,
        fiscal_year: i32,
        dimension: RollupDimension,
    ) -> Result<Vec<WaterfallRow>, RepositoryError> {
        let column = dimension.column();
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT COALESCE({column}, '') AS key, COALESCE({column}, '') AS label,
                    SUM(dotation_modifiee_cents) AS dotation,
                    SUM(total_engage_cents) AS engage,
                    SUM(total_liquide_cents) AS liquide,
                    SUM(total_ordonnance_cents) AS ordonnance,
                    SUM(total_paye_cents) AS paye
             FROM budget_line WHERE fiscal_year = ?
             GROUP BY COALESCE({column}, '') ORDER BY key"
        ))
        .bind(fiscal_year)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_waterfall).collect()
    }
}

fn row_to_waterfall(row: &sqlx::sqlite::SqliteRow) -> Result<WaterfallRow, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    Ok(WaterfallRow {
        key: row.try_get("key").map_err(decode)?,
        label: row.try_get("label").map_err(decode)?,
        dotation: cents_to_decimal(row.try_get("dotation").map_err(decode)?),
        engage: cents_to_decimal(row.try_get("engage").map_err(decode)?),
        liquide: cents_to_decimal(row.try_get("liquide").map_err(decode)?),
        ordonnance: cents_to_decimal(row.try_get("ordonnance").map_err(decode)?),
        paye: cents_to_decimal(row.try_get("paye").map_err(decode)?),
    })
}
