use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use signoff_core::concurrency::VersionToken;
use signoff_core::domain::task::{TaskState, TestTask};

use super::{column, RepositoryError, VersionedRepository};
use crate::DbPool;

pub struct SqlTestTaskRepository {
    pool: DbPool,
}

impl SqlTestTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &SqliteRow) -> Result<TestTask, RepositoryError> {
    let progress: i64 = column(row, "progress_pct")?;
    let state: String = column(row, "state")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(TestTask {
        id: column(row, "id")?,
        title: column(row, "title")?,
        assignee_id: column(row, "assignee_id")?,
        progress_pct: u8::try_from(progress)
            .map_err(|_| RepositoryError::Decode(format!("invalid progress `{progress}`")))?,
        state: TaskState::parse(&state)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown task state `{state}`")))?,
        version: VersionToken::parse(&updated_at)
            .ok_or_else(|| RepositoryError::Decode(format!("invalid version `{updated_at}`")))?,
    })
}

#[async_trait]
impl VersionedRepository<TestTask> for SqlTestTaskRepository {
    async fn find(&self, id: &str) -> Result<Option<TestTask>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, title, assignee_id, progress_pct, state, updated_at
             FROM test_task WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn insert(&self, task: &TestTask) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO test_task (id, title, assignee_id, progress_pct, state, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.assignee_id)
        .bind(i64::from(task.progress_pct))
        .bind(task.state.as_str())
        .bind(task.version.to_storage())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::classify)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        task: &TestTask,
        expected: VersionToken,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE test_task
             SET title = ?, assignee_id = ?, progress_pct = ?, state = ?, updated_at = ?
             WHERE id = ? AND updated_at = ?",
        )
        .bind(&task.title)
        .bind(&task.assignee_id)
        .bind(i64::from(task.progress_pct))
        .bind(task.state.as_str())
        .bind(task.version.to_storage())
        .bind(&task.id)
        .bind(expected.to_storage())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
