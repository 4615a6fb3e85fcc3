use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use signoff_core::documents::{DocumentRecord, SyncMark};
use signoff_core::domain::business::BusinessType;
use signoff_core::domain::instance::InstanceId;

use super::{
    column, parse_business_type, parse_sync_mark, parse_timestamp, to_storage,
    DocumentRepository, RepositoryError, SyncWrite,
};
use crate::DbPool;

pub struct SqlDocumentRepository {
    pool: DbPool,
}

impl SqlDocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list(
        &self,
        business_type: BusinessType,
    ) -> Result<Vec<DocumentRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT business_type, id, number, title, status, current_approval_instance_id,
                    last_reject_reason, updated_at, sync_mark
             FROM business_document WHERE business_type = ? ORDER BY number ASC",
        )
        .bind(business_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }
}

fn row_to_document(row: &SqliteRow) -> Result<DocumentRecord, RepositoryError> {
    let business_type: String = column(row, "business_type")?;
    let instance_id: Option<String> = column(row, "current_approval_instance_id")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(DocumentRecord {
        business_type: parse_business_type(&business_type)?,
        id: column(row, "id")?,
        number: column(row, "number")?,
        title: column(row, "title")?,
        status: column(row, "status")?,
        current_approval_instance_id: instance_id.map(InstanceId),
        last_reject_reason: column(row, "last_reject_reason")?,
        updated_at: parse_timestamp(&updated_at)?,
        synced: parse_sync_mark(column(row, "sync_mark")?)?,
    })
}

#[async_trait]
impl DocumentRepository for SqlDocumentRepository {
    async fn find(
        &self,
        business_type: BusinessType,
        id: &str,
    ) -> Result<Option<DocumentRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT business_type, id, number, title, status, current_approval_instance_id,
                    last_reject_reason, updated_at, sync_mark
             FROM business_document WHERE business_type = ? AND id = ?",
        )
        .bind(business_type.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn save(&self, document: &DocumentRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO business_document
                 (business_type, id, number, title, status, current_approval_instance_id,
                  last_reject_reason, updated_at, sync_mark)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (business_type, id) DO UPDATE SET
                 number = excluded.number,
                 title = excluded.title,
                 status = excluded.status,
                 current_approval_instance_id = excluded.current_approval_instance_id,
                 last_reject_reason = excluded.last_reject_reason,
                 updated_at = excluded.updated_at,
                 sync_mark = excluded.sync_mark",
        )
        .bind(document.business_type.as_str())
        .bind(&document.id)
        .bind(&document.number)
        .bind(&document.title)
        .bind(&document.status)
        .bind(document.current_approval_instance_id.as_ref().map(|id| id.0.as_str()))
        .bind(&document.last_reject_reason)
        .bind(to_storage(&document.updated_at))
        .bind(document.synced.as_ref().map(SyncMark::to_storage))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sync(
        &self,
        document: &DocumentRecord,
        mark: &SyncMark,
    ) -> Result<SyncWrite, RepositoryError> {
        let stamp = mark.to_storage();
        let result = sqlx::query(
            "UPDATE business_document
             SET status = ?, current_approval_instance_id = ?, last_reject_reason = ?,
                 updated_at = ?, sync_mark = ?
             WHERE business_type = ? AND id = ? AND (sync_mark IS NULL OR sync_mark < ?)",
        )
        .bind(&document.status)
        .bind(document.current_approval_instance_id.as_ref().map(|id| id.0.as_str()))
        .bind(&document.last_reject_reason)
        .bind(to_storage(&document.updated_at))
        .bind(&stamp)
        .bind(document.business_type.as_str())
        .bind(&document.id)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(SyncWrite::Applied);
        }

        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM business_document WHERE business_type = ? AND id = ?",
        )
        .bind(document.business_type.as_str())
        .bind(&document.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(if exists.is_some() { SyncWrite::Superseded } else { SyncWrite::Missing })
    }

    async fn delete(
        &self,
        business_type: BusinessType,
        id: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM business_document WHERE business_type = ? AND id = ?")
            .bind(business_type.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
