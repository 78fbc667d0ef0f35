use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use uxmcp_agent::{ExecutionOptions, ExecutionResult};
use uxmcp_core::error::{ErrorKind, UxmcpError};
use uxmcp_core::model::Agent;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<Agent>> {
    Json(state.registry.list_agents().await)
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.registry.get_agent(id).await.ok_or_else(|| UxmcpError::new(ErrorKind::UnknownAgent, id.to_string()))?))
}

pub async fn create(State(state): State<Arc<AppState>>, Json(agent): Json<Agent>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.registry.create_agent(agent).await?))
}

pub async fn update(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(agent): Json<Agent>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.registry.update_agent(id, agent).await?))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<()> {
    state.registry.delete_agent(id).await?;
    Ok(())
}

pub async fn activate(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.registry.activate_agent(id).await?))
}

pub async fn deactivate(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.registry.deactivate_agent(id).await?))
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub missing_tools: Vec<String>,
}

pub async fn validate(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<ValidationReport>> {
    let agent = state.registry.get_agent(id).await.ok_or_else(|| UxmcpError::new(ErrorKind::UnknownAgent, id.to_string()))?;
    let missing_tools = state.registry.validate_agent_tools(&agent).await;
    Ok(Json(ValidationReport { missing_tools }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub input: Value,
    #[serde(default)]
    pub deadline_seconds: Option<u64>,
}

pub async fn execute(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<ExecuteRequest>) -> ApiResult<Json<ExecutionResult>> {
    let agent = state.registry.get_agent(id).await.ok_or_else(|| UxmcpError::new(ErrorKind::UnknownAgent, id.to_string()))?;
    let options = ExecutionOptions {
        deadline: Duration::from_secs(req.deadline_seconds.unwrap_or(60)),
        ..ExecutionOptions::default()
    };
    Ok(Json(state.executor.execute(&agent, req.input, options).await?))
}
