use sqlx::Row;

use budgex_core::numbering::SequenceKey;

use super::{RepositoryError, SequenceRepository};
use crate::DbPool;

pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SequenceRepository for SqlSequenceRepository {
    async fn next_ordinal(&self, key: &SequenceKey) -> Result<i64, RepositoryError> {
        // Single statement so two callers racing on the same counter row
        // still receive distinct, contiguous ordinals.
        let row = sqlx::query(
            "INSERT INTO document_sequence (doc_type, period, scope, next_ordinal)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(doc_type, period, scope)
             DO UPDATE SET next_ordinal = next_ordinal + 1
             RETURNING next_ordinal",
        )
        .bind(key.doc_type.as_str())
        .bind(key.period)
        .bind(key.scope_column())
        .fetch_one(&self.pool)
        .await?;
        row.try_get("next_ordinal")
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use budgex_core::numbering::{DocumentType, SequenceKey};

    use super::SqlSequenceRepository;
    use crate::repositories::SequenceRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn ordinals_start_at_one_and_are_contiguous() {
        let pool = setup().await;
        let repo = SqlSequenceRepository::new(pool);
        let key = SequenceKey { doc_type: DocumentType::Engagement, period: 2026, scope: None };

        for expected in 1..=5 {
            let ordinal = repo.next_ordinal(&key).await.expect("next");
            assert_eq!(ordinal, expected);
        }
    }

    #[tokio::test]
    async fn counters_are_isolated_per_type_period_and_scope() {
        let pool = setup().await;
        let repo = SqlSequenceRepository::new(pool);

        let engagement_2026 =
            SequenceKey { doc_type: DocumentType::Engagement, period: 2026, scope: None };
        let engagement_2027 =
            SequenceKey { doc_type: DocumentType::Engagement, period: 2027, scope: None };
        let liquidation_2026 =
            SequenceKey { doc_type: DocumentType::Liquidation, period: 2026, scope: None };
        let scoped = SequenceKey {
            doc_type: DocumentType::Engagement,
            period: 2026,
            scope: Some("DAF".to_owned()),
        };

        repo.next_ordinal(&engagement_2026).await.expect("next");
        repo.next_ordinal(&engagement_2026).await.expect("next");

        assert_eq!(repo.next_ordinal(&engagement_2027).await.expect("next"), 1);
        assert_eq!(repo.next_ordinal(&liquidation_2026).await.expect("next"), 1);
        assert_eq!(repo.next_ordinal(&scoped).await.expect("next"), 1);
        assert_eq!(repo.next_ordinal(&engagement_2026).await.expect("next"), 3);
    }
}
