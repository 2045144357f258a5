use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use budgex_core::domain::budget_line::BudgetLineId;
use budgex_core::domain::dossier::DossierId;
use budgex_core::domain::stage::{
    DeferralInfo, StageKind, StageRecord, StageRecordId, StageStatus,
};
use budgex_core::domain::step::{
    ApprovalRole, StepStatus, ValidationStep, ValidationStepId,
};

use super::{RepositoryError, StageRecordRepository, StepClaim};
use crate::money::{cents_to_decimal, decimal_to_cents};
use crate::DbPool;

pub struct SqlStageRecordRepository {
    pool: DbPool,
}

impl SqlStageRecordRepository {
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

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<StageRecord, RepositoryError> {
    let kind_str: String = row.try_get("kind").map_err(decode)?;
    let kind = StageKind::parse(&kind_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown stage kind `{kind_str}`")))?;
    let status_str: String = row.try_get("status").map_err(decode)?;
    let status = StageStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_str}`")))?;

    let deferral_reason: Option<String> = row.try_get("deferral_reason").map_err(decode)?;
    let deferral = match deferral_reason {
        Some(reason) => {
            let target_date: Option<String> =
                row.try_get("deferral_target_date").map_err(decode)?;
            let deferred_at: Option<String> = row.try_get("deferred_at").map_err(decode)?;
            Some(DeferralInfo {
                reason,
                resume_condition: row.try_get("deferral_resume_condition").map_err(decode)?,
                target_date: target_date
                    .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                deferred_by: row
                    .try_get::<Option<String>, _>("deferred_by")
                    .map_err(decode)?
                    .unwrap_or_default(),
                deferred_at: deferred_at.as_deref().map(parse_datetime).unwrap_or_else(Utc::now),
            })
        }
        None => None,
    };

    let current_step: i64 = row.try_get("current_step").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(StageRecord {
        id: StageRecordId(row.try_get("id").map_err(decode)?),
        kind,
        document_number: row.try_get("document_number").map_err(decode)?,
        amount: cents_to_decimal(row.try_get("amount_cents").map_err(decode)?),
        fiscal_year: row.try_get("fiscal_year").map_err(decode)?,
        status,
        current_step: usize::try_from(current_step).unwrap_or(0),
        deferral,
        budget_line_id: BudgetLineId(row.try_get("budget_line_id").map_err(decode)?),
        predecessor_id: row
            .try_get::<Option<String>, _>("predecessor_id")
            .map_err(decode)?
            .map(StageRecordId),
        dossier_id: DossierId(row.try_get("dossier_id").map_err(decode)?),
        object: row.try_get("object").map_err(decode)?,
        beneficiary: row.try_get("beneficiary").map_err(decode)?,
        created_by: row.try_get("created_by").map_err(decode)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ValidationStep, RepositoryError> {
    let role_str: String = row.try_get("required_role").map_err(decode)?;
    let required_role = ApprovalRole::parse(&role_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role_str}`")))?;
    let status_str: String = row.try_get("status").map_err(decode)?;
    let status = StepStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_str}`")))?;
    let position: i64 = row.try_get("position").map_err(decode)?;
    let validated_at: Option<String> = row.try_get("validated_at").map_err(decode)?;

    Ok(ValidationStep {
        id: ValidationStepId(row.try_get("id").map_err(decode)?),
        record_id: StageRecordId(row.try_get("record_id").map_err(decode)?),
        position: usize::try_from(position).unwrap_or(0),
        required_role,
        status,
        validated_by: row.try_get("validated_by").map_err(decode)?,
        validated_at: validated_at.as_deref().map(parse_datetime),
        comments: row.try_get("comments").map_err(decode)?,
    })
}

const SELECT_RECORD: &str = "SELECT id, kind, document_number, amount_cents, fiscal_year, status,
        current_step, deferral_reason, deferral_resume_condition, deferral_target_date,
        deferred_by, deferred_at, budget_line_id, predecessor_id, dossier_id, object,
        beneficiary, created_by, created_at, updated_at
 FROM stage_record";

const SELECT_STEP: &str = "SELECT id, record_id, position, required_role, status, validated_by,
        validated_at, comments
 FROM validation_step";

#[async_trait::async_trait]
impl StageRecordRepository for SqlStageRecordRepository {
    async fn find_by_id(
        &self,
        id: &StageRecordId,
    ) -> Result<Option<StageRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_RECORD} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(ref r) => Ok(Some(row_to_record(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: StageRecord) -> Result<(), RepositoryError> {
        let deferral = record.deferral.as_ref();
        sqlx::query(
            "INSERT INTO stage_record (id, kind, document_number, amount_cents, fiscal_year,
                                       status, current_step, deferral_reason,
                                       deferral_resume_condition, deferral_target_date,
                                       deferred_by, deferred_at, budget_line_id, predecessor_id,
                                       dossier_id, object, beneficiary, created_by, created_at,
                                       updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 document_number = excluded.document_number,
                 amount_cents = excluded.amount_cents,
                 status = excluded.status,
                 current_step = excluded.current_step,
                 deferral_reason = excluded.deferral_reason,
                 deferral_resume_condition = excluded.deferral_resume_condition,
                 deferral_target_date = excluded.deferral_target_date,
                 deferred_by = excluded.deferred_by,
                 deferred_at = excluded.deferred_at,
                 object = excluded.object,
                 beneficiary = excluded.beneficiary,
                 updated_at = excluded.updated_at",
        )
        .bind(&record.id.0)
        .bind(record.kind.as_str())
        .bind(&record.document_number)
        .bind(decimal_to_cents(record.amount)?)
        .bind(record.fiscal_year)
        .bind(record.status.as_str())
        .bind(record.current_step as i64)
        .bind(deferral.map(|d| d.reason.clone()))
        .bind(deferral.and_then(|d| d.resume_condition.clone()))
        .bind(deferral.and_then(|d| d.target_date.map(|date| date.to_string())))
        .bind(deferral.map(|d| d.deferred_by.clone()))
        .bind(deferral.map(|d| d.deferred_at.to_rfc3339()))
        .bind(&record.budget_line_id.0)
        .bind(record.predecessor_id.as_ref().map(|p| p.0.clone()))
        .bind(&record.dossier_id.0)
        .bind(&record.object)
        .bind(&record.beneficiary)
        .bind(&record.created_by)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_dossier(
        &self,
        dossier_id: &DossierId,
    ) -> Result<Vec<StageRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query(&format!("{SELECT_RECORD} WHERE dossier_id = ? ORDER BY created_at"))
                .bind(&dossier_id.0)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<StageRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query(&format!("{SELECT_RECORD} WHERE fiscal_year = ? ORDER BY created_at"))
                .bind(fiscal_year)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn transition_status(
        &self,
        id: &StageRecordId,
        from: StageStatus,
        from_step: usize,
        to: StageStatus,
        to_step: usize,
    ) -> Result<bool, RepositoryError> {
        let affected = sqlx::query(
            "UPDATE stage_record
             SET status = ?, current_step = ?, updated_at = ?
             WHERE id = ? AND status = ? AND current_step = ?",
        )
        .bind(to.as_str())
        .bind(to_step as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .bind(from.as_str())
        .bind(from_step as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn set_document_number(
        &self,
        id: &StageRecordId,
        document_number: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE stage_record SET document_number = ?, updated_at = ? WHERE id = ?")
            .bind(document_number)
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_deferral(
        &self,
        id: &StageRecordId,
        deferral: Option<&DeferralInfo>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE stage_record
             SET deferral_reason = ?, deferral_resume_condition = ?, deferral_target_date = ?,
                 deferred_by = ?, deferred_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(deferral.map(|d| d.reason.clone()))
        .bind(deferral.and_then(|d| d.resume_condition.clone()))
        .bind(deferral.and_then(|d| d.target_date.map(|date| date.to_string())))
        .bind(deferral.map(|d| d.deferred_by.clone()))
        .bind(deferral.map(|d| d.deferred_at.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sum_by_predecessor(
        &self,
        predecessor_id: &StageRecordId,
        exclude: Option<&StageRecordId>,
    ) -> Result<Decimal, RepositoryError> {
        let excluded = exclude.map(|id| id.0.as_str()).unwrap_or("");
        let total: i64 = sqlx::query(
            "SELECT COALESCE(SUM(amount_cents), 0) AS total
             FROM stage_record
             WHERE predecessor_id = ? AND status NOT IN ('rejected', 'cancelled') AND id <> ?",
        )
        .bind(&predecessor_id.0)
        .bind(excluded)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")
        .map_err(decode)?;
        Ok(cents_to_decimal(total))
    }

    async fn insert_steps(&self, steps: &[ValidationStep]) -> Result<(), RepositoryError> {
        for step in steps {
            sqlx::query(
                "INSERT INTO validation_step (id, record_id, position, required_role, status,
                                              validated_by, validated_at, comments)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&step.record_id.0)
            .bind(step.position as i64)
            .bind(step.required_role.as_str())
            .bind(step.status.as_str())
            .bind(&step.validated_by)
            .bind(step.validated_at.map(|at| at.to_rfc3339()))
            .bind(&step.comments)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn steps_for(
        &self,
        record_id: &StageRecordId,
    ) -> Result<Vec<ValidationStep>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query(&format!("{SELECT_STEP} WHERE record_id = ? ORDER BY position"))
                .bind(&record_id.0)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_step).collect()
    }

    async fn claim_step(
        &self,
        record_id: &StageRecordId,
        position: usize,
        outcome: StepClaim<'_>,
    ) -> Result<bool, RepositoryError> {
        let (status, actor, at, comments) = match outcome {
            StepClaim::Validate { actor, at, comments } => {
                (StepStatus::Validated, actor, at, comments.map(str::to_owned))
            }
            StepClaim::Reject { actor, at, reason } => {
                (StepStatus::Rejected, actor, at, Some(reason.to_owned()))
            }
        };

        // The `status = 'pending'` guard arbitrates concurrent approvals:
        // the first writer flips the row, the second sees zero rows.
        let affected = sqlx::query(
            "UPDATE validation_step
             SET status = ?, validated_by = ?, validated_at = ?, comments = ?
             WHERE record_id = ? AND position = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(actor)
        .bind(at.to_rfc3339())
        .bind(&comments)
        .bind(&record_id.0)
        .bind(position as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }
}
