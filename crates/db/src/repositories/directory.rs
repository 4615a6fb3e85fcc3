use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use signoff_core::approvals::ApproverDirectory;
use signoff_core::domain::identity::ApproverIdentity;
use signoff_core::errors::WorkflowError;

use super::{column, RepositoryError};
use crate::DbPool;

/// Approver directory backed by the `directory_*` tables.
pub struct SqlApproverDirectory {
    pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: String,
    pub display_name: String,
    pub department_id: Option<String>,
    pub active: bool,
    pub roles: Vec<String>,
}

impl SqlApproverDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a user together with their full role set.
    pub async fn upsert_user(&self, user: &DirectoryUser) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO directory_user (id, display_name, department_id, active)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 display_name = excluded.display_name,
                 department_id = excluded.department_id,
                 active = excluded.active",
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(&user.department_id)
        .bind(user.active)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM directory_user_role WHERE user_id = ?")
            .bind(&user.id)
            .execute(&mut *tx)
            .await?;

        for role in &user.roles {
            sqlx::query(
                "INSERT OR IGNORE INTO directory_user_role (user_id, role_code) VALUES (?, ?)",
            )
            .bind(&user.id)
            .bind(role)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_department(
        &self,
        id: &str,
        name: &str,
        head_user_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO directory_department (id, name, head_user_id) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 head_user_id = excluded.head_user_id",
        )
        .bind(id)
        .bind(name)
        .bind(head_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_active(&self, user_id: &str, active: bool) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE directory_user SET active = ? WHERE id = ?")
            .bind(active)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_identity(row: &SqliteRow) -> Result<ApproverIdentity, RepositoryError> {
    Ok(ApproverIdentity {
        user_id: column(row, "id")?,
        display_name: column(row, "display_name")?,
        active: column(row, "active")?,
    })
}

fn directory_error(error: RepositoryError) -> WorkflowError {
    WorkflowError::Directory(error.to_string())
}

#[async_trait]
impl ApproverDirectory for SqlApproverDirectory {
    async fn find_users_by_role(
        &self,
        role_code: &str,
    ) -> Result<Vec<ApproverIdentity>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT u.id, u.display_name, u.active
             FROM directory_user u
             JOIN directory_user_role r ON r.user_id = u.id
             WHERE r.role_code = ?
             ORDER BY u.id ASC",
        )
        .bind(role_code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| directory_error(e.into()))?;

        rows.iter().map(row_to_identity).collect::<Result<_, _>>().map_err(directory_error)
    }

    async fn find_department_head(
        &self,
        department_id: &str,
    ) -> Result<Option<ApproverIdentity>, WorkflowError> {
        let row = sqlx::query(
            "SELECT u.id, u.display_name, u.active
             FROM directory_department d
             JOIN directory_user u ON u.id = d.head_user_id
             WHERE d.id = ?",
        )
        .bind(department_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| directory_error(e.into()))?;

        row.as_ref().map(row_to_identity).transpose().map_err(directory_error)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<ApproverIdentity>, WorkflowError> {
        let row = sqlx::query("SELECT id, display_name, active FROM directory_user WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| directory_error(e.into()))?;

        row.as_ref().map(row_to_identity).transpose().map_err(directory_error)
    }
}
