//! JSON endpoints over the approval services.
//!
//! Approvals:
//! - `POST   /approvals/submit`: open an instance for a document
//! - `GET    /approvals/{id}`: one instance with its decisions
//! - `POST   /approvals/{id}/act`: approve or reject the current step
//! - `GET    /documents/{business_type}/{business_id}/approvals`: instance history, oldest first
//! - `GET    /approvers/{actor_id}/pending`: instances waiting on an approver
//! - `POST   /documents/{business_type}/{business_id}/resync`: re-derive the
//!   document status from its latest instance
//!
//! Flow administration:
//! - `GET|POST          /flows`
//! - `GET|PATCH|DELETE  /flows/{id}`
//! - `POST              /flows/{id}/enabled`
//! - `POST              /flows/{id}/nodes`
//! - `PUT|DELETE        /flows/{id}/nodes/{node_id}`
//! - `POST              /flows/{id}/reorder`
//!
//! Numbering and guarded records:
//! - `POST /numbers/{prefix}`
//! - `POST /stock`: register an item; the threshold defaults to
//!   `workflow.default_low_stock_threshold`
//! - `GET  /stock/{id}`
//! - `POST /stock/{id}/adjust`
//!
//! Every request carries a correlation id, taken from `x-correlation-id` or
//! generated, and echoed in error bodies.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use signoff_core::approvals::{Action, DirectoryNodeResolver, Submission};
use signoff_core::audit::AuditSink;
use signoff_core::concurrency::{RetryPolicy, VersionToken};
use signoff_core::config::WorkflowConfig;
use signoff_core::domain::business::BusinessType;
use signoff_core::domain::flow::{
    ApprovalFlow, FlowId, FlowPatch, NewApprovalFlow, NodeDraft, NodeId, NodePatch,
};
use signoff_core::domain::instance::{ApprovalInstance, DecisionAction, InstanceId};
use signoff_core::documents::DocumentRecord;
use signoff_core::domain::stock::{NewStockItem, StockItem};
use signoff_core::errors::{ApplicationError, InterfaceError, WorkflowError};
use signoff_core::sequence::DocumentNumber;
use signoff_db::repositories::{SqlApproverDirectory, SqlStockRepository, VersionedRepository};
use signoff_db::services::approval::ActResult;
use signoff_db::{
    ApprovalService, DbPool, FlowAdminService, OptimisticGuard, SequenceGenerator, Stores,
    TracingAuditSink,
};

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    approvals: Arc<ApprovalService>,
    flows: Arc<FlowAdminService>,
    numbers: SequenceGenerator,
    stock: OptimisticGuard<StockItem>,
    stock_threshold: Decimal,
}

impl ApiState {
    /// Wires the SQL stores, the directory-backed resolver and the tracing
    /// audit sink.
    pub fn new(db_pool: DbPool, workflow: &WorkflowConfig) -> Result<Self, WorkflowError> {
        let stores = Stores::sql(db_pool.clone());
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let numbers = SequenceGenerator::from_config(stores.sequences.clone(), workflow)?;

        let resolver = DirectoryNodeResolver::new(SqlApproverDirectory::new(db_pool.clone()));
        let approvals =
            ApprovalService::new(stores.clone(), Arc::new(resolver)).with_audit(audit.clone());
        let flows = FlowAdminService::new(&stores, numbers.clone()).with_audit(audit.clone());

        let stock_repository: Arc<dyn VersionedRepository<StockItem>> =
            Arc::new(SqlStockRepository::new(db_pool));
        let stock = OptimisticGuard::new(stock_repository)
            .with_retry_policy(RetryPolicy { max_retries: workflow.guard_max_retries })
            .with_audit(audit);

        Ok(Self {
            approvals: Arc::new(approvals),
            flows: Arc::new(flows),
            numbers,
            stock,
            stock_threshold: workflow.default_low_stock_threshold,
        })
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/approvals/submit", post(submit))
        .route("/approvals/{id}", get(get_instance))
        .route("/approvals/{id}/act", post(act))
        .route("/documents/{business_type}/{business_id}/approvals", get(instances_for))
        .route("/documents/{business_type}/{business_id}/resync", post(resync_document))
        .route("/approvers/{actor_id}/pending", get(pending_for_approver))
        .route("/flows", get(list_flows).post(create_flow))
        .route("/flows/{id}", get(get_flow).patch(update_flow).delete(delete_flow))
        .route("/flows/{id}/enabled", post(set_flow_enabled))
        .route("/flows/{id}/nodes", post(add_node))
        .route("/flows/{id}/nodes/{node_id}", put(update_node).delete(remove_node))
        .route("/flows/{id}/reorder", post(reorder_nodes))
        .route("/numbers/{prefix}", post(next_number))
        .route("/stock", post(create_stock))
        .route("/stock/{id}", get(get_stock))
        .route("/stock/{id}/adjust", post(adjust_stock))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ActRequest {
    pub actor_id: String,
    pub actor_name: String,
    pub action: DecisionAction,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FlowListQuery {
    pub business_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    #[serde(flatten)]
    pub node: NodeDraft,
    /// 1-based insertion point; appended when absent.
    pub position: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub node_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct NumberQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: Decimal,
    pub expected_version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl ApiError {
    fn new(error: WorkflowError, correlation_id: &str) -> Self {
        Self(ApplicationError::from(error).into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let detail = self.0.to_string();
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                error = %detail,
                "request failed"
            );
        } else {
            warn!(
                event_name = "api.request.refused",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                error = %detail,
                "request refused"
            );
        }

        let body = ErrorBody {
            error: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn business_type(raw: &str) -> Result<BusinessType, WorkflowError> {
    BusinessType::parse(raw).ok_or_else(|| {
        WorkflowError::invalid_input("business_type", format!("unknown business type `{raw}`"))
    })
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

async fn submit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(submission): Json<Submission>,
) -> ApiResult<(StatusCode, Json<ApprovalInstance>)> {
    let corr = correlation_id(&headers);
    let instance =
        state.approvals.submit(&submission, &corr).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok((StatusCode::CREATED, Json(instance)))
}

async fn get_instance(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalInstance>> {
    let corr = correlation_id(&headers);
    let instance =
        state.approvals.get_instance(&InstanceId(id)).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(instance))
}

async fn act(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ActRequest>,
) -> ApiResult<Json<ActResult>> {
    let corr = correlation_id(&headers);
    let action = Action {
        instance_id: InstanceId(id),
        actor_id: request.actor_id,
        actor_name: request.actor_name,
        action: request.action,
        comment: request.comment,
    };
    let result = state.approvals.act(&action, &corr).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(result))
}

async fn instances_for(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((raw_type, business_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ApprovalInstance>>> {
    let corr = correlation_id(&headers);
    let business_type = business_type(&raw_type).map_err(|e| ApiError::new(e, &corr))?;
    let instances = state
        .approvals
        .instances_for(business_type, &business_id)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(instances))
}

async fn pending_for_approver(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(actor_id): Path<String>,
) -> ApiResult<Json<Vec<ApprovalInstance>>> {
    let corr = correlation_id(&headers);
    let instances = state
        .approvals
        .pending_for_approver(&actor_id)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(instances))
}

async fn resync_document(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((raw_type, business_id)): Path<(String, String)>,
) -> ApiResult<Json<DocumentRecord>> {
    let corr = correlation_id(&headers);
    let business_type = business_type(&raw_type).map_err(|e| ApiError::new(e, &corr))?;
    let document = state
        .approvals
        .resync(business_type, &business_id, &corr)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(document))
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

async fn list_flows(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<FlowListQuery>,
) -> ApiResult<Json<Vec<ApprovalFlow>>> {
    let corr = correlation_id(&headers);
    let filter = query
        .business_type
        .as_deref()
        .map(business_type)
        .transpose()
        .map_err(|e| ApiError::new(e, &corr))?;
    let flows = state.flows.list(filter).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flows))
}

async fn create_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(new): Json<NewApprovalFlow>,
) -> ApiResult<(StatusCode, Json<ApprovalFlow>)> {
    let corr = correlation_id(&headers);
    let flow = state.flows.create(new, &corr).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok((StatusCode::CREATED, Json(flow)))
}

async fn get_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalFlow>> {
    let corr = correlation_id(&headers);
    let flow = state.flows.get(&FlowId(id)).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flow))
}

async fn update_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<FlowPatch>,
) -> ApiResult<Json<ApprovalFlow>> {
    let corr = correlation_id(&headers);
    let flow =
        state.flows.update(&FlowId(id), patch, &corr).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flow))
}

async fn delete_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let corr = correlation_id(&headers);
    state.flows.delete(&FlowId(id), &corr).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_flow_enabled(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<EnabledRequest>,
) -> ApiResult<Json<ApprovalFlow>> {
    let corr = correlation_id(&headers);
    let flow = state
        .flows
        .set_enabled(&FlowId(id), request.enabled, &corr)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flow))
}

async fn add_node(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AddNodeRequest>,
) -> ApiResult<Json<ApprovalFlow>> {
    let corr = correlation_id(&headers);
    let flow = state
        .flows
        .add_node(&FlowId(id), request.node, request.position, &corr)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flow))
}

async fn update_node(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((id, node_id)): Path<(String, String)>,
    Json(patch): Json<NodePatch>,
) -> ApiResult<Json<ApprovalFlow>> {
    let corr = correlation_id(&headers);
    let flow = state
        .flows
        .update_node(&FlowId(id), &NodeId(node_id), patch, &corr)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flow))
}

async fn remove_node(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((id, node_id)): Path<(String, String)>,
) -> ApiResult<Json<ApprovalFlow>> {
    let corr = correlation_id(&headers);
    let flow = state
        .flows
        .remove_node(&FlowId(id), &NodeId(node_id), &corr)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flow))
}

async fn reorder_nodes(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ReorderRequest>,
) -> ApiResult<Json<ApprovalFlow>> {
    let corr = correlation_id(&headers);
    let ordered: Vec<NodeId> = request.node_ids.into_iter().map(NodeId).collect();
    let flow = state
        .flows
        .reorder(&FlowId(id), &ordered, &corr)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(flow))
}

// ---------------------------------------------------------------------------
// Numbers and stock
// ---------------------------------------------------------------------------

async fn next_number(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(prefix): Path<String>,
    Query(query): Query<NumberQuery>,
) -> ApiResult<(StatusCode, Json<DocumentNumber>)> {
    let corr = correlation_id(&headers);
    let issued = match query.date {
        Some(date) => state.numbers.next_on(&prefix, date).await,
        None => state.numbers.next(&prefix).await,
    };
    let number = issued.map_err(|e| ApiError::new(e, &corr))?;
    Ok((StatusCode::CREATED, Json(number)))
}

async fn create_stock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(registration): Json<NewStockItem>,
) -> ApiResult<(StatusCode, Json<StockItem>)> {
    let corr = correlation_id(&headers);
    let item = state
        .stock
        .register_stock(registration, state.stock_threshold)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_stock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<StockItem>> {
    let corr = correlation_id(&headers);
    let item = state.stock.get(&id).await.map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(item))
}

async fn adjust_stock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AdjustStockRequest>,
) -> ApiResult<Json<StockItem>> {
    let corr = correlation_id(&headers);
    let expected = VersionToken::parse(&request.expected_version).ok_or_else(|| {
        ApiError::new(
            WorkflowError::invalid_input("expected_version", "must be an RFC 3339 timestamp"),
            &corr,
        )
    })?;
    let item = state
        .stock
        .adjust_stock(&id, request.delta, expected)
        .await
        .map_err(|e| ApiError::new(e, &corr))?;
    Ok(Json(item))
}
