use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use signoff_core::documents::DownstreamEffect;
use signoff_core::domain::instance::InstanceId;

use super::{column, parse_timestamp, to_storage, EffectRecord, EffectRepository, RepositoryError};
use crate::DbPool;

/// Outbox of work handed to the host after final approval.
pub struct SqlEffectRepository {
    pool: DbPool,
}

impl SqlEffectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_effect(row: &SqliteRow) -> Result<EffectRecord, RepositoryError> {
    let payload: String = column(row, "payload")?;
    let status: String = column(row, "status")?;
    let created_at: String = column(row, "created_at")?;

    Ok(EffectRecord {
        id: column(row, "id")?,
        instance_id: InstanceId(column(row, "instance_id")?),
        effect: serde_json::from_str(&payload)
            .map_err(|e| RepositoryError::Decode(format!("invalid effect payload: {e}")))?,
        applied: status == "applied",
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl EffectRepository for SqlEffectRepository {
    async fn record(
        &self,
        instance_id: &InstanceId,
        effect: &DownstreamEffect,
    ) -> Result<i64, RepositoryError> {
        let payload = serde_json::to_string(effect)
            .map_err(|e| RepositoryError::Decode(format!("unserializable effect: {e}")))?;
        let business = effect.business_ref();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO downstream_effect
                 (instance_id, effect_kind, business_type, business_id, payload, status, created_at)
             VALUES (?, ?, ?, ?, ?, 'pending', ?)
             ON CONFLICT (instance_id, effect_kind) DO UPDATE SET instance_id = excluded.instance_id
             RETURNING id",
        )
        .bind(&instance_id.0)
        .bind(effect.kind())
        .bind(business.business_type.as_str())
        .bind(&business.business_id)
        .bind(payload)
        .bind(to_storage(&Utc::now()))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_applied(&self, id: i64) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE downstream_effect SET status = 'applied', applied_at = ? WHERE id = ?")
            .bind(to_storage(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, pending_only: bool) -> Result<Vec<EffectRecord>, RepositoryError> {
        let sql = if pending_only {
            "SELECT id, instance_id, payload, status, created_at FROM downstream_effect
             WHERE status = 'pending' ORDER BY id ASC"
        } else {
            "SELECT id, instance_id, payload, status, created_at FROM downstream_effect
             ORDER BY id ASC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_effect).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::SqlEffectRepository;
    use crate::repositories::EffectRepository;
    use crate::{connect_with_settings, migrations};
    use signoff_core::documents::DownstreamEffect;
    use signoff_core::domain::instance::InstanceId;

    #[tokio::test]
    async fn recorded_effects_stay_pending_until_applied() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlEffectRepository::new(pool);
        let instance = InstanceId("inst-1".to_owned());

        let contract_effect = DownstreamEffect::GenerateContract { quotation_id: "q-1".to_owned() };
        let report_effect = DownstreamEffect::PublishReport { report_id: "r-1".to_owned() };
        let contract = repo.record(&instance, &contract_effect).await.expect("record");
        repo.record(&instance, &report_effect).await.expect("record");

        repo.mark_applied(contract).await.expect("apply");

        let pending = repo.list(true).await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].effect, report_effect);

        let all = repo.list(false).await.expect("all");
        assert_eq!(all.len(), 2);
        assert!(all[0].applied);
    }

    #[tokio::test]
    async fn recording_the_same_effect_twice_keeps_one_row() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlEffectRepository::new(pool);
        let instance = InstanceId("inst-1".to_owned());
        let effect = DownstreamEffect::GenerateEntrustment { contract_id: "ct-1".to_owned() };

        let first = repo.record(&instance, &effect).await.expect("record");
        let again = repo.record(&instance, &effect).await.expect("replay");
        assert_eq!(first, again);
        assert_eq!(repo.list(false).await.expect("all").len(), 1);

        let other = InstanceId("inst-2".to_owned());
        assert_ne!(repo.record(&other, &effect).await.expect("record"), first);
    }
}
