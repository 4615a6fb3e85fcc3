use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use signoff_core::domain::business::BusinessType;
use signoff_core::domain::flow::FlowId;
use signoff_core::domain::instance::{
    ApprovalInstance, Decision, DecisionAction, InstanceId, InstanceStatus, StepPosition,
};

use super::{
    column, parse_business_type, parse_timestamp, to_storage, CommitOutcome, DecisionCommit,
    InstanceRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlInstanceRepository {
    pool: DbPool,
}

impl SqlInstanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_decisions(&self, instance_id: &str) -> Result<Vec<Decision>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT step_order, node_target_name, actor_id, actor_name, action, comment, decided_at
             FROM approval_decision WHERE instance_id = ?
             ORDER BY step_order ASC, decided_at ASC",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_decision).collect()
    }

    async fn hydrate_all(
        &self,
        rows: &[SqliteRow],
    ) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let mut instance = row_to_instance(row)?;
            instance.decisions = self.load_decisions(&instance.id.0).await?;
            instances.push(instance);
        }
        Ok(instances)
    }
}

fn row_to_instance(row: &SqliteRow) -> Result<ApprovalInstance, RepositoryError> {
    let business_type: String = column(row, "business_type")?;
    let status: String = column(row, "status")?;
    let current_step: i64 = column(row, "current_step")?;
    let version: i64 = column(row, "version")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(ApprovalInstance {
        id: InstanceId(column(row, "id")?),
        business_type: parse_business_type(&business_type)?,
        business_id: column(row, "business_id")?,
        flow_id: FlowId(column(row, "flow_id")?),
        flow_code: column(row, "flow_code")?,
        submitter_id: column(row, "submitter_id")?,
        submitter_name: column(row, "submitter_name")?,
        current_step: StepPosition::from_storage(current_step).ok_or_else(|| {
            RepositoryError::Decode(format!("invalid current_step `{current_step}`"))
        })?,
        status: InstanceStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown instance status `{status}`")))?,
        decisions: Vec::new(),
        version: u32::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("invalid version `{version}`")))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_decision(row: &SqliteRow) -> Result<Decision, RepositoryError> {
    let step_order: i64 = column(row, "step_order")?;
    let action: String = column(row, "action")?;
    let decided_at: String = column(row, "decided_at")?;

    Ok(Decision {
        step_order: u32::try_from(step_order)
            .map_err(|_| RepositoryError::Decode(format!("invalid step_order `{step_order}`")))?,
        node_target_name: column(row, "node_target_name")?,
        actor_id: column(row, "actor_id")?,
        actor_name: column(row, "actor_name")?,
        action: DecisionAction::parse(&action)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown action `{action}`")))?,
        comment: column(row, "comment")?,
        decided_at: parse_timestamp(&decided_at)?,
    })
}

const INSTANCE_COLUMNS: &str = "SELECT id, business_type, business_id, flow_id, flow_code,
            submitter_id, submitter_name, current_step, status, version, created_at, updated_at
     FROM approval_instance";

#[async_trait]
impl InstanceRepository for SqlInstanceRepository {
    async fn insert_pending(&self, instance: &ApprovalInstance) -> Result<(), RepositoryError> {
        // The partial unique index on pending rows makes check-and-insert atomic.
        sqlx::query(
            "INSERT INTO approval_instance
                 (id, business_type, business_id, flow_id, flow_code, submitter_id,
                  submitter_name, current_step, status, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id.0)
        .bind(instance.business_type.as_str())
        .bind(&instance.business_id)
        .bind(&instance.flow_id.0)
        .bind(&instance.flow_code)
        .bind(&instance.submitter_id)
        .bind(&instance.submitter_name)
        .bind(instance.current_step.to_storage())
        .bind(instance.status.as_str())
        .bind(i64::from(instance.version))
        .bind(to_storage(&instance.created_at))
        .bind(to_storage(&instance.updated_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::classify)?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let row = sqlx::query(&format!("{INSTANCE_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate_all(&[row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_for_business(
        &self,
        business_type: BusinessType,
        business_id: &str,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{INSTANCE_COLUMNS} WHERE business_type = ? AND business_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(business_type.as_str())
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_all(&rows).await
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{INSTANCE_COLUMNS} WHERE status = 'pending' ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_all(&rows).await
    }

    async fn count_pending_for_flow(&self, flow_id: &FlowId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM approval_instance WHERE flow_id = ? AND status = 'pending'",
        )
        .bind(&flow_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn record_decision(
        &self,
        commit: DecisionCommit<'_>,
    ) -> Result<CommitOutcome, RepositoryError> {
        let instance = commit.instance;
        let decision = commit.decision;
        let mut tx = self.pool.begin().await?;

        // The conditional update is the first write, so the transaction holds
        // the write lock before the decision row goes in.
        let updated = sqlx::query(
            "UPDATE approval_instance
             SET current_step = ?, status = ?, version = ?, updated_at = ?
             WHERE id = ? AND status = 'pending' AND current_step = ? AND version = ?",
        )
        .bind(instance.current_step.to_storage())
        .bind(instance.status.as_str())
        .bind(i64::from(instance.version))
        .bind(to_storage(&instance.updated_at))
        .bind(&instance.id.0)
        .bind(i64::from(commit.expected_step))
        .bind(i64::from(commit.expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::Stale);
        }

        let inserted = sqlx::query(
            "INSERT INTO approval_decision
                 (instance_id, step_order, node_target_name, actor_id, actor_name, action,
                  comment, decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id.0)
        .bind(i64::from(decision.step_order))
        .bind(&decision.node_target_name)
        .bind(&decision.actor_id)
        .bind(&decision.actor_name)
        .bind(decision.action.as_str())
        .bind(&decision.comment)
        .bind(to_storage(&decision.decided_at))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::classify);

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(CommitOutcome::Committed)
            }
            Err(error) if error.is_unique_violation() => {
                tx.rollback().await?;
                Ok(CommitOutcome::Stale)
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::approvals::engine::{Action, ApprovalEngine, Submission};
    use signoff_core::domain::business::BusinessType;
    use signoff_core::domain::flow::{ApprovalFlow, NewApprovalFlow, NodeDraft, NodeTarget};
    use signoff_core::domain::identity::ApproverIdentity;
    use signoff_core::domain::instance::{DecisionAction, InstanceStatus};

    use super::SqlInstanceRepository;
    use crate::repositories::{CommitOutcome, DecisionCommit, InstanceRepository};
    use crate::{connect_with_settings, migrations};

    async fn repository() -> SqlInstanceRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlInstanceRepository::new(pool)
    }

    fn flow() -> ApprovalFlow {
        ApprovalFlow::create(
            NewApprovalFlow {
                name: "Contract review".to_owned(),
                code: None,
                business_type: BusinessType::Contract,
                description: String::new(),
                enabled: true,
                nodes: vec![
                    NodeDraft::new("Legal", NodeTarget::Role("legal".to_owned()), "Legal"),
                    NodeDraft::new(
                        "Director",
                        NodeTarget::Role("lab_director".to_owned()),
                        "Director",
                    ),
                ],
            },
            "CT_STD".to_owned(),
            Utc::now(),
        )
        .expect("flow")
    }

    fn submission(business_id: &str) -> Submission {
        Submission {
            business_type: BusinessType::Contract,
            business_id: business_id.to_owned(),
            flow_code: "CT_STD".to_owned(),
            submitter_id: "u-sales".to_owned(),
            submitter_name: "Zhao Min".to_owned(),
        }
    }

    #[tokio::test]
    async fn second_pending_instance_for_same_document_is_refused() {
        let repo = repository().await;
        let engine = ApprovalEngine::new();
        let flow = flow();

        let first = engine.start(&flow, &submission("ct-1"), Utc::now()).expect("start");
        repo.insert_pending(&first).await.expect("first");
        let second = engine.start(&flow, &submission("ct-1"), Utc::now()).expect("start");
        let error = repo.insert_pending(&second).await.expect_err("already pending");
        assert!(error.is_unique_violation());

        let other = engine.start(&flow, &submission("ct-2"), Utc::now()).expect("start");
        repo.insert_pending(&other).await.expect("other document");
        assert_eq!(repo.count_pending_for_flow(&flow.id).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn stale_commit_writes_nothing() {
        let repo = repository().await;
        let engine = ApprovalEngine::new();
        let flow = flow();
        let instance = engine.start(&flow, &submission("ct-1"), Utc::now()).expect("start");
        repo.insert_pending(&instance).await.expect("insert");

        let action = Action {
            instance_id: instance.id.clone(),
            actor_id: "u-legal".to_owned(),
            actor_name: "Legal".to_owned(),
            action: DecisionAction::Approve,
            comment: None,
        };
        let approvers = vec![ApproverIdentity::new("u-legal", "Legal")];
        let outcome =
            engine.apply(&instance, &flow, &approvers, &action, Utc::now()).expect("apply");

        let commit = DecisionCommit {
            instance: &outcome.instance,
            decision: &outcome.decision,
            expected_step: outcome.expected_step,
            expected_version: outcome.expected_version,
        };
        assert_eq!(
            repo.record_decision(commit.clone()).await.expect("commit"),
            CommitOutcome::Committed
        );
        assert_eq!(repo.record_decision(commit).await.expect("replay"), CommitOutcome::Stale);

        let stored = repo.find_by_id(&instance.id).await.expect("find").expect("exists");
        assert_eq!(stored.decisions.len(), 1);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.status, InstanceStatus::Pending);
    }
}
