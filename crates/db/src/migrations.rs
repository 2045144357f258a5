use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

const LEDGER_TABLES: &[&str] =
    &["budget_line", "dossier", "stage_record", "validation_step", "document_sequence", "activity"];

/// Ledger tables the migrations should have created but did not. Empty when
/// the schema is ready.
pub async fn missing_tables(pool: &DbPool) -> Result<Vec<&'static str>, sqlx::Error> {
    use sqlx::Row;

    let mut missing = Vec::new();
    for table in LEDGER_TABLES {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await?
        .get("count");
        if count != 1 {
            missing.push(*table);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "budget_line",
        "dossier",
        "stage_record",
        "validation_step",
        "document_sequence",
        "activity",
        "idx_budget_line_fiscal_year",
        "idx_budget_line_code",
        "idx_dossier_fiscal_year",
        "idx_dossier_reference",
        "idx_stage_record_line",
        "idx_stage_record_predecessor",
        "idx_stage_record_dossier",
        "idx_stage_record_status",
        "idx_validation_step_record",
        "idx_activity_fiscal_year",
    ];

    #[tokio::test]
    async fn migrations_create_all_managed_objects() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for name in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(name)
            .fetch_one(&pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count");
            assert_eq!(count, 1, "missing schema object {name}");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
    }
}
