use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

/// Default flows seeded for each business type, with the role or target that
/// staffs their first step.
const SEED_FLOWS: &[SeedFlowContract] = &[
    SeedFlowContract {
        flow_id: "flow-qt-std",
        code: "QT_STD",
        business_type: "quotation",
        node_count: 3,
        first_target: "sales_manager",
        document_id: "q-demo-001",
        document_status: "draft",
        description: "Quotation: sales manager, finance, lab director",
    },
    SeedFlowContract {
        flow_id: "flow-ct-std",
        code: "CT_STD",
        business_type: "contract",
        node_count: 2,
        first_target: "legal",
        document_id: "c-demo-001",
        document_status: "draft",
        description: "Contract: legal review, laboratory head",
    },
    SeedFlowContract {
        flow_id: "flow-rp-std",
        code: "RP_STD",
        business_type: "report",
        node_count: 3,
        first_target: "report_reviewer",
        document_id: "r-demo-001",
        document_status: "draft",
        description: "Report: review, approve, issue",
    },
    SeedFlowContract {
        flow_id: "flow-ii-del",
        code: "II_DELETE",
        business_type: "inspection_item",
        node_count: 1,
        first_target: "quality",
        document_id: "ii-demo-001",
        document_status: "current",
        description: "Inspection item deletion: quality head",
    },
    SeedFlowContract {
        flow_id: "flow-cs-std",
        code: "CS_STD",
        business_type: "consultation_assessment",
        node_count: 2,
        first_target: "evaluator",
        document_id: "cs-demo-001",
        document_status: "draft",
        description: "Consultation assessment: evaluator, lab director",
    },
];

const SEED_USER_IDS: &[&str] = &[
    "u-sales",
    "u-sales-mgr",
    "u-finance",
    "u-director",
    "u-legal",
    "u-reviewer",
    "u-approver",
    "u-issuer",
    "u-qa",
    "u-evaluator",
];

const SEED_DEPARTMENT_IDS: &[&str] = &["sales", "finance", "lab", "quality"];
const SEED_STOCK_IDS: &[&str] = &["stk-nitric", "stk-buffer"];
const SEED_TASK_IDS: &[&str] = &["task-demo-001"];
const SEED_SEQUENCE_PREFIXES: &[&str] = &["QT", "CT", "RP", "II", "CS"];
const SEED_SEQUENCE_DATE: &str = "20260105";

/// Demo dataset: approver directory, one default flow per business type, one
/// submittable document per flow, and a little stock and task data.
///
/// Loading is idempotent; rows that already exist are left untouched.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let flows_seeded = SEED_FLOWS
            .iter()
            .map(|flow| FlowSeedInfo {
                code: flow.code,
                business_type: flow.business_type,
                document_id: flow.document_id,
                description: flow.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { flows_seeded })
    }

    /// Checks that every seeded row is present and matches the contract above.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        checks.push((
            "directory-users",
            count_in(pool, "directory_user", "id", SEED_USER_IDS).await?
                == SEED_USER_IDS.len() as i64,
        ));
        checks.push((
            "directory-departments",
            count_in(pool, "directory_department", "id", SEED_DEPARTMENT_IDS).await?
                == SEED_DEPARTMENT_IDS.len() as i64,
        ));
        checks.push((
            "stock-items",
            count_in(pool, "stock_item", "id", SEED_STOCK_IDS).await?
                == SEED_STOCK_IDS.len() as i64,
        ));
        checks.push((
            "test-tasks",
            count_in(pool, "test_task", "id", SEED_TASK_IDS).await? == SEED_TASK_IDS.len() as i64,
        ));

        let counters: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM sequence_counter WHERE date_key = ?1 AND prefix IN {}",
            sql_array_from_ids(SEED_SEQUENCE_PREFIXES)
        ))
        .bind(SEED_SEQUENCE_DATE)
        .fetch_one(pool)
        .await?;
        checks.push(("sequence-counters", counters == SEED_SEQUENCE_PREFIXES.len() as i64));

        for flow in SEED_FLOWS {
            let flow_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_flow
                 WHERE id = ?1 AND code = ?2 AND business_type = ?3 AND enabled = 1)",
            )
            .bind(flow.flow_id)
            .bind(flow.code)
            .bind(flow.business_type)
            .fetch_one(pool)
            .await?;
            checks.push((flow.code, flow_ok == 1));

            let node_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM approval_node WHERE flow_id = ?1")
                    .bind(flow.flow_id)
                    .fetch_one(pool)
                    .await?;
            let first_target: Option<String> = sqlx::query_scalar(
                "SELECT target_id FROM approval_node WHERE flow_id = ?1 AND node_order = 1",
            )
            .bind(flow.flow_id)
            .fetch_optional(pool)
            .await?;
            checks.push((
                flow.nodes_label(),
                node_count == flow.node_count
                    && first_target.as_deref() == Some(flow.first_target),
            ));

            let document_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM business_document
                 WHERE business_type = ?1 AND id = ?2 AND status = ?3)",
            )
            .bind(flow.business_type)
            .bind(flow.document_id)
            .bind(flow.document_status)
            .fetch_one(pool)
            .await?;
            checks.push((flow.document_id, document_ok == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded rows, including any instances raised against the
    /// seeded documents.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let flow_ids =
            sql_array_from_ids(&SEED_FLOWS.iter().map(|flow| flow.flow_id).collect::<Vec<_>>());
        let document_ids =
            sql_array_from_ids(&SEED_FLOWS.iter().map(|flow| flow.document_id).collect::<Vec<_>>());

        let statements = [
            format!("DELETE FROM downstream_effect WHERE business_id IN {document_ids}"),
            format!("DELETE FROM approval_instance WHERE business_id IN {document_ids}"),
            format!("DELETE FROM business_document WHERE id IN {document_ids}"),
            format!("DELETE FROM approval_flow WHERE id IN {flow_ids}"),
            format!(
                "DELETE FROM directory_user WHERE id IN {}",
                sql_array_from_ids(SEED_USER_IDS)
            ),
            format!(
                "DELETE FROM directory_department WHERE id IN {}",
                sql_array_from_ids(SEED_DEPARTMENT_IDS)
            ),
            format!("DELETE FROM stock_item WHERE id IN {}", sql_array_from_ids(SEED_STOCK_IDS)),
            format!("DELETE FROM test_task WHERE id IN {}", sql_array_from_ids(SEED_TASK_IDS)),
        ];
        for statement in &statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedFlowContract {
    flow_id: &'static str,
    code: &'static str,
    business_type: &'static str,
    node_count: i64,
    first_target: &'static str,
    document_id: &'static str,
    document_status: &'static str,
    description: &'static str,
}

impl SeedFlowContract {
    fn nodes_label(&self) -> &'static str {
        match self.code {
            "QT_STD" => "qt-std-nodes",
            "CT_STD" => "ct-std-nodes",
            "RP_STD" => "rp-std-nodes",
            "II_DELETE" => "ii-delete-nodes",
            _ => "cs-std-nodes",
        }
    }
}

async fn count_in(
    pool: &DbPool,
    table: &str,
    column: &str,
    ids: &[&str],
) -> Result<i64, RepositoryError> {
    let count = sqlx::query_scalar(&format!(
        "SELECT COUNT(1) FROM {table} WHERE {column} IN {}",
        sql_array_from_ids(ids)
    ))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub flows_seeded: Vec<FlowSeedInfo>,
}

#[derive(Debug)]
pub struct FlowSeedInfo {
    pub code: &'static str,
    pub business_type: &'static str,
    pub document_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use signoff_core::approvals::{DirectoryNodeResolver, NodeResolver, ResolutionContext};
    use signoff_core::domain::business::BusinessType;

    use super::*;
    use crate::repositories::{FlowRepository, SqlApproverDirectory, SqlFlowRepository};
    use crate::{connect_with_settings, migrations};

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!SeedDataset::SQL.is_empty());
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = seeded_pool().await;

        let first = SeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = SeedDataset::verify(&pool).await.expect("verify seed fixtures");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.flows_seeded.len(), 5);

        let second = SeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification =
            SeedDataset::verify(&pool).await.expect("re-verify seed fixtures");
        assert!(second_verification.all_present);
        assert_eq!(second.flows_seeded.len(), 5);
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn every_seeded_first_step_resolves_to_an_approver() {
        let pool = seeded_pool().await;
        SeedDataset::load(&pool).await.expect("load seed fixtures");

        let flows = SqlFlowRepository::new(pool.clone());
        let resolver = DirectoryNodeResolver::new(SqlApproverDirectory::new(pool.clone()));

        for (business_type, flow) in BusinessType::ALL.into_iter().zip(SEED_FLOWS) {
            let context = ResolutionContext {
                business_type,
                business_id: flow.document_id.to_owned(),
                submitter_id: "u-sales".to_owned(),
            };
            let listed = flows.list(Some(business_type)).await.expect("list flows");
            assert_eq!(listed.len(), 1, "one default flow for {business_type}");
            for node in &listed[0].nodes {
                let approvers = resolver.resolve(node, &context).await.expect("resolve node");
                assert!(!approvers.is_empty(), "node {} has no approver", node.name);
            }
        }
    }

    #[tokio::test]
    async fn clean_removes_seeded_rows() {
        let pool = seeded_pool().await;
        SeedDataset::load(&pool).await.expect("load seed fixtures");
        SeedDataset::clean(&pool).await.expect("clean seed fixtures");

        let verification = SeedDataset::verify(&pool).await.expect("verify after clean");
        assert!(!verification.all_present);

        let nodes: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM approval_node")
            .fetch_one(&pool)
            .await
            .expect("count nodes");
        assert_eq!(nodes, 0, "nodes cascade with their flow");
    }
}
