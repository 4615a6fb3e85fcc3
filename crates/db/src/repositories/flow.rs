use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use signoff_core::domain::business::BusinessType;
use signoff_core::domain::flow::{ApprovalFlow, ApprovalNode, FlowId, NodeId, NodeTarget};

use super::{
    column, parse_business_type, parse_timestamp, to_storage, FlowRepository, FlowWrite,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlFlowRepository {
    pool: DbPool,
}

impl SqlFlowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_nodes(&self, flow_id: &str) -> Result<Vec<ApprovalNode>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, target_type, target_id, target_name, node_order
             FROM approval_node WHERE flow_id = ? ORDER BY node_order ASC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_node).collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<ApprovalFlow, RepositoryError> {
        let mut flow = row_to_flow(row)?;
        flow.nodes = self.load_nodes(&flow.id.0).await?;
        Ok(flow)
    }

    async fn write(
        &self,
        flow: &ApprovalFlow,
        mode: WriteMode,
    ) -> Result<FlowWrite, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let statement = match mode {
            WriteMode::Insert => {
                "INSERT INTO approval_flow
                     (id, name, code, business_type, description, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            }
            WriteMode::Replace => {
                "UPDATE approval_flow
                 SET name = ?2, code = ?3, business_type = ?4, description = ?5, enabled = ?6,
                     updated_at = ?8
                 WHERE id = ?1"
            }
            WriteMode::ReplaceIdle => {
                "UPDATE approval_flow
                 SET name = ?2, code = ?3, business_type = ?4, description = ?5, enabled = ?6,
                     updated_at = ?8
                 WHERE id = ?1 AND NOT EXISTS (
                     SELECT 1 FROM approval_instance WHERE flow_id = ?1 AND status = 'pending'
                 )"
            }
        };
        let result = sqlx::query(statement)
            .bind(&flow.id.0)
            .bind(&flow.name)
            .bind(&flow.code)
            .bind(flow.business_type.as_str())
            .bind(&flow.description)
            .bind(flow.enabled)
            .bind(to_storage(&flow.created_at))
            .bind(to_storage(&flow.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::classify)?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM approval_flow WHERE id = ?")
                    .bind(&flow.id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Ok(if exists.is_some() { FlowWrite::InUse } else { FlowWrite::Missing });
        }

        sqlx::query("DELETE FROM approval_node WHERE flow_id = ?")
            .bind(&flow.id.0)
            .execute(&mut *tx)
            .await?;

        for node in &flow.nodes {
            sqlx::query(
                "INSERT INTO approval_node
                     (id, flow_id, name, target_type, target_id, target_name, node_order)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&node.id.0)
            .bind(&flow.id.0)
            .bind(&node.name)
            .bind(node.target.target_type())
            .bind(node.target.target_id())
            .bind(&node.target_name)
            .bind(i64::from(node.order))
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::classify)?;
        }

        tx.commit().await?;
        Ok(FlowWrite::Applied)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Replace,
    /// Replace, unless a pending instance references the flow.
    ReplaceIdle,
}

fn row_to_flow(row: &SqliteRow) -> Result<ApprovalFlow, RepositoryError> {
    let business_type: String = column(row, "business_type")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(ApprovalFlow {
        id: FlowId(column(row, "id")?),
        name: column(row, "name")?,
        code: column(row, "code")?,
        business_type: parse_business_type(&business_type)?,
        description: column(row, "description")?,
        enabled: column(row, "enabled")?,
        nodes: Vec::new(),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_node(row: &SqliteRow) -> Result<ApprovalNode, RepositoryError> {
    let target_type: String = column(row, "target_type")?;
    let target_id: String = column(row, "target_id")?;
    let order: i64 = column(row, "node_order")?;

    let target = NodeTarget::from_parts(&target_type, target_id)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown node target `{target_type}`")))?;
    let order = u32::try_from(order)
        .map_err(|_| RepositoryError::Decode(format!("invalid node order `{order}`")))?;

    Ok(ApprovalNode {
        id: NodeId(column(row, "id")?),
        name: column(row, "name")?,
        target,
        target_name: column(row, "target_name")?,
        order,
    })
}

const FLOW_COLUMNS: &str =
    "SELECT id, name, code, business_type, description, enabled, created_at, updated_at
     FROM approval_flow";

#[async_trait]
impl FlowRepository for SqlFlowRepository {
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let row = sqlx::query(&format!("{FLOW_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(
        &self,
        business_type: BusinessType,
        code: &str,
    ) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let row = sqlx::query(&format!("{FLOW_COLUMNS} WHERE business_type = ? AND code = ?"))
            .bind(business_type.as_str())
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        business_type: Option<BusinessType>,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let rows = match business_type {
            Some(business_type) => {
                sqlx::query(&format!(
                    "{FLOW_COLUMNS} WHERE business_type = ? ORDER BY created_at ASC, code ASC"
                ))
                .bind(business_type.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{FLOW_COLUMNS} ORDER BY created_at ASC, code ASC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut flows = Vec::with_capacity(rows.len());
        for row in &rows {
            flows.push(self.hydrate(row).await?);
        }
        Ok(flows)
    }

    async fn insert(&self, flow: &ApprovalFlow) -> Result<(), RepositoryError> {
        self.write(flow, WriteMode::Insert).await.map(|_| ())
    }

    async fn save(&self, flow: &ApprovalFlow) -> Result<FlowWrite, RepositoryError> {
        self.write(flow, WriteMode::Replace).await
    }

    async fn save_idle(&self, flow: &ApprovalFlow) -> Result<FlowWrite, RepositoryError> {
        self.write(flow, WriteMode::ReplaceIdle).await
    }

    async fn delete(&self, id: &FlowId) -> Result<FlowWrite, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM approval_flow
             WHERE id = ?1 AND NOT EXISTS (
                 SELECT 1 FROM approval_instance WHERE flow_id = ?1 AND status = 'pending'
             )",
        )
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(FlowWrite::Applied);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM approval_flow WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(if exists.is_some() { FlowWrite::InUse } else { FlowWrite::Missing })
    }
}
