use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use uxmcp_codehost::{ExecutionRequest as HandlerRequest, DEFAULT_DEADLINE};
use uxmcp_core::model::Service;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<Service>> {
    Json(state.registry.list_services().await)
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Service>> {
    let svc = state
        .registry
        .get_service(id)
        .await
        .ok_or_else(|| uxmcp_core::error::UxmcpError::new(uxmcp_core::error::ErrorKind::UnknownService, id.to_string()))?;
    Ok(Json(svc))
}

pub async fn create(State(state): State<Arc<AppState>>, Json(svc): Json<Service>) -> ApiResult<Json<Service>> {
    Ok(Json(state.registry.create_service(svc).await?))
}

pub async fn update(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(svc): Json<Service>) -> ApiResult<Json<Service>> {
    Ok(Json(state.registry.update_service(id, svc).await?))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<()> {
    state.registry.delete_service(id).await?;
    Ok(())
}

pub async fn activate(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Service>> {
    Ok(Json(state.registry.activate_service(id, &state.allowed_dependencies).await?))
}

pub async fn deactivate(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Service>> {
    Ok(Json(state.registry.deactivate_service(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

/// Runs the handler directly with caller-supplied params (spec §6:
/// "test runs the handler with LLM-generated inputs" — here the caller
/// supplies them, since generating them is the meta-agent's job).
pub async fn test(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<TestRequest>) -> ApiResult<Json<Value>> {
    let svc = state
        .registry
        .get_service(id)
        .await
        .ok_or_else(|| uxmcp_core::error::UxmcpError::new(uxmcp_core::error::ErrorKind::UnknownService, id.to_string()))?;
    let result = state
        .code_host
        .execute(HandlerRequest {
            execution_id: Uuid::new_v4().to_string(),
            code: svc.code,
            dependencies: svc.dependencies,
            params: req.params,
            deadline: DEFAULT_DEADLINE,
        })
        .await?;
    Ok(Json(result))
}
