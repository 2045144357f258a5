use sqlx::Row;

use budgex_core::domain::activity::{Activity, ActivityId};

use super::{ActivityRepository, RepositoryError};
use crate::DbPool;

pub struct SqlActivityRepository {
    pool: DbPool,
}

impl SqlActivityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_activity(row: &sqlx::sqlite::SqliteRow) -> Result<Activity, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    Ok(Activity {
        id: ActivityId(row.try_get("id").map_err(decode)?),
        fiscal_year: row.try_get("fiscal_year").map_err(decode)?,
        code: row.try_get("code").map_err(decode)?,
        label: row.try_get("label").map_err(decode)?,
        program_code: row.try_get("program_code").map_err(decode)?,
    })
}

#[async_trait::async_trait]
impl ActivityRepository for SqlActivityRepository {
    async fn save(&self, activity: Activity) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO activity (id, fiscal_year, code, label, program_code)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 label = excluded.label,
                 program_code = excluded.program_code",
        )
        .bind(&activity.id.0)
        .bind(activity.fiscal_year)
        .bind(&activity.code)
        .bind(&activity.label)
        .bind(&activity.program_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_year(&self, fiscal_year: i32) -> Result<Vec<Activity>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, fiscal_year, code, label, program_code
             FROM activity WHERE fiscal_year = ? ORDER BY code",
        )
        .bind(fiscal_year)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_activity).collect()
    }
}

#[cfg(test)]
mod tests {
    use budgex_core::domain::activity::{Activity, ActivityId};

    use super::SqlActivityRepository;
    use crate::repositories::ActivityRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn save_and_list_round_trip() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlActivityRepository::new(pool);

        repo.save(Activity {
            id: ActivityId("ACT-2".to_owned()),
            fiscal_year: 2026,
            code: "A-02".to_owned(),
            label: "Entretien routier".to_owned(),
            program_code: None,
        })
        .await
        .expect("save");
        repo.save(Activity {
            id: ActivityId("ACT-1".to_owned()),
            fiscal_year: 2026,
            code: "A-01".to_owned(),
            label: "Construction scolaire".to_owned(),
            program_code: Some("P-100".to_owned()),
        })
        .await
        .expect("save");

        let listed = repo.list_by_year(2026).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].code, "A-01");
        assert_eq!(listed[0].program_code.as_deref(), Some("P-100"));
        assert_eq!(listed[1].code, "A-02");
    }
}
