use async_trait::async_trait;
use chrono::Utc;

use super::{to_storage, RepositoryError, SequenceRepository};
use crate::DbPool;

pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceRepository for SqlSequenceRepository {
    async fn increment(&self, prefix: &str, date_key: &str) -> Result<u64, RepositoryError> {
        // Single statement: SQLite serializes writers, so no two callers can
        // observe the same counter value.
        let counter: i64 = sqlx::query_scalar(
            "INSERT INTO sequence_counter (prefix, date_key, counter, updated_at)
             VALUES (?, ?, 1, ?)
             ON CONFLICT (prefix, date_key)
             DO UPDATE SET counter = counter + 1, updated_at = excluded.updated_at
             RETURNING counter",
        )
        .bind(prefix)
        .bind(date_key)
        .bind(to_storage(&Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        u64::try_from(counter)
            .map_err(|_| RepositoryError::Decode(format!("invalid counter `{counter}`")))
    }

    async fn count_issued(&self, stem: &str) -> Result<u64, RepositoryError> {
        let pattern = format!("{stem}%");
        let count: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM business_document WHERE number LIKE ?1)
                  + (SELECT COUNT(*) FROM approval_flow WHERE code LIKE ?1)",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}
