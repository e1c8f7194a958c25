/*
* VM Manager API Routes
* ---------------------
* @project: cluster-vm-manager
*
* Public API (bearer JWT, api quota):
*
* POST   /api/v1/vms                 - create a VM
* GET    /api/v1/vms                 - list every VM (name, state, node)
* GET    /api/v1/vms/names?node=     - VM names, cluster-wide or on one node
* GET    /api/v1/vms/table           - inventory as a text table
* GET    /api/v1/vms/{name}          - VM summary and configuration
* GET    /api/v1/vms/{name}/exists   - existence check (?node= optional)
* GET    /api/v1/vms/{name}/history  - configuration change history
* POST   /api/v1/vms/validate-name   - syntax check only
* POST   /api/v1/vms/check-name      - syntax + availability
*
* Cluster RPC (bearer JWT with the cluster role, rpc quota):
*
* POST   /internal/v1/rpc            - execute a RemoteOperation locally
*/

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::api::middleware::{auth_middleware, rate_limit_middleware, RateLimiter};
use crate::auth::Principal;
use crate::cluster::{transport::RPC_PATH, RemoteOperation, RemoteOutcome};
use crate::config::RateLimitSettings;
use crate::core::factory::{CreateVmRequest, VmFactory};
use crate::core::registry::validate_name;
use crate::core::vm::VmSummary;
use crate::errors::VmError;
use crate::storage::{DiskDriver, StorageType};
use crate::store::{ChangeRecord, VmRecord};

const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub factory: Arc<VmFactory>,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(factory: Arc<VmFactory>, jwt_secret: impl Into<String>) -> Self {
        Self {
            factory,
            jwt_secret: jwt_secret.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVmBody {
    pub name: String,
    pub cpu_cores: u32,
    /// Bytes.
    pub memory_allocation: u64,
    #[serde(default)]
    pub hard_drives: Vec<u64>,
    #[serde(default)]
    pub network_interfaces: Vec<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub available_nodes: Vec<String>,
    #[serde(default)]
    pub storage_type: Option<StorageType>,
    #[serde(default)]
    pub hard_drive_driver: Option<DiskDriver>,
}

impl From<CreateVmBody> for CreateVmRequest {
    fn from(body: CreateVmBody) -> Self {
        let mut request = CreateVmRequest::new(body.name, body.cpu_cores, body.memory_allocation)
            .with_hard_drives(body.hard_drives)
            .with_network_interfaces(body.network_interfaces)
            .with_available_nodes(body.available_nodes);
        request.node = body.node;
        request.storage_type = body.storage_type;
        request.hard_drive_driver = body.hard_drive_driver;
        request
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDetails {
    #[serde(flatten)]
    pub summary: VmSummary,
    pub config: VmRecord,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeQuery {
    pub node: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameBody {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub name: String,
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameCheckResponse {
    pub name: String,
    pub valid: bool,
    pub available: Option<bool>,
}

pub fn create_router(state: Arc<AppState>, limits: &RateLimitSettings) -> Router {
    let api_limiter = Arc::new(RateLimiter::per_minute("api", limits.api_requests_per_minute));
    let rpc_limiter = Arc::new(RateLimiter::per_minute("rpc", limits.rpc_requests_per_minute));

    let api_router = Router::new()
        .route("/api/v1/vms", post(create_vm).get(list_vms))
        .route("/api/v1/vms/names", get(list_vm_names))
        .route("/api/v1/vms/table", get(render_table))
        .route("/api/v1/vms/validate-name", post(validate_vm_name))
        .route("/api/v1/vms/check-name", post(check_name_available))
        .route("/api/v1/vms/{name}", get(get_vm))
        .route("/api/v1/vms/{name}/exists", get(vm_exists))
        .route("/api/v1/vms/{name}/history", get(vm_history))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(from_fn_with_state(api_limiter, rate_limit_middleware));

    let rpc_router = Router::new()
        .route(RPC_PATH, post(cluster_rpc))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(from_fn_with_state(rpc_limiter, rate_limit_middleware));

    Router::new()
        .merge(api_router)
        .merge(rpc_router)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
}

async fn create_vm(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Principal>,
    Json(body): Json<CreateVmBody>,
) -> Result<impl IntoResponse, VmError> {
    let vm = state.factory.create(&caller, body.into()).await?;
    Ok((StatusCode::CREATED, Json(vm.summary()?)))
}

async fn list_vms(State(state): State<Arc<AppState>>) -> Result<Json<Vec<VmSummary>>, VmError> {
    Ok(Json(state.factory.inventory().summaries()?))
}

async fn list_vm_names(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NodeQuery>,
) -> Result<Json<Vec<String>>, VmError> {
    let names = state
        .factory
        .inventory()
        .list_names(query.node.as_deref())
        .await?;
    Ok(Json(names))
}

async fn render_table(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, VmError> {
    let table = state.factory.inventory().render_table()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], table))
}

async fn get_vm(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Result<Json<VmDetails>, VmError> {
    let vm = state.factory.get_by_name(&name)?;
    Ok(Json(VmDetails {
        summary: vm.summary()?,
        config: vm.config()?,
    }))
}

async fn vm_exists(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<Json<ExistsResponse>, VmError> {
    let exists = state
        .factory
        .registry()
        .exists(&name, query.node.as_deref())
        .await?;
    Ok(Json(ExistsResponse { name, exists }))
}

async fn vm_history(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ChangeRecord>>, VmError> {
    Ok(Json(state.factory.change_history(&name)?))
}

async fn validate_vm_name(Json(body): Json<NameBody>) -> Result<Json<NameCheckResponse>, VmError> {
    validate_name(&body.name)?;
    Ok(Json(NameCheckResponse {
        name: body.name,
        valid: true,
        available: None,
    }))
}

async fn check_name_available(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NameBody>,
) -> Result<Json<NameCheckResponse>, VmError> {
    state.factory.registry().check_name_available(&body.name).await?;
    Ok(Json(NameCheckResponse {
        name: body.name,
        valid: true,
        available: Some(true),
    }))
}

async fn cluster_rpc(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Principal>,
    Json(operation): Json<RemoteOperation>,
) -> Result<Json<RemoteOutcome>, VmError> {
    Ok(Json(state.factory.handle_remote(&caller, operation).await?))
}
