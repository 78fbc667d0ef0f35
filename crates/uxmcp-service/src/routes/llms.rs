use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use uxmcp_core::error::{ErrorKind, UxmcpError};
use uxmcp_core::model::LlmProfile;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<LlmProfile>> {
    Json(state.registry.list_profiles().await)
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<LlmProfile>> {
    Ok(Json(state.registry.get_profile(id).await.ok_or_else(|| UxmcpError::new(ErrorKind::UnknownProfile, id.to_string()))?))
}

pub async fn create(State(state): State<Arc<AppState>>, Json(profile): Json<LlmProfile>) -> ApiResult<Json<LlmProfile>> {
    Ok(Json(state.registry.create_profile(profile).await?))
}

pub async fn update(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(profile): Json<LlmProfile>) -> ApiResult<Json<LlmProfile>> {
    Ok(Json(state.registry.update_profile(id, profile).await?))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<()> {
    state.registry.delete_profile(id).await?;
    Ok(())
}
