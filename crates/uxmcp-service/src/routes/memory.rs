//! `/agents/{id}/memory...` (spec §6). The source's overlapping
//! `/memory/summary` and `/memory/stats` endpoints are collapsed to `stats`
//! only (spec §9 open question; see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use uxmcp_core::memory::MemoryFilters;
use uxmcp_core::model::{MemoryContentType, MemoryRecord};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn list(State(state): State<Arc<AppState>>, Path(agent_id): Path<Uuid>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<MemoryRecord>>> {
    Ok(Json(state.memory.list(agent_id, MemoryFilters::default(), q.limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    pub content: Value,
    #[serde(default)]
    pub importance: Option<f32>,
    #[serde(default)]
    pub content_type: Option<MemoryContentType>,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn store(State(state): State<Arc<AppState>>, Path(agent_id): Path<Uuid>, Json(req): Json<StoreRequest>) -> ApiResult<Json<MemoryRecord>> {
    let agent = state
        .registry
        .get_agent(agent_id)
        .await
        .ok_or_else(|| uxmcp_core::error::UxmcpError::new(uxmcp_core::error::ErrorKind::UnknownAgent, agent_id.to_string()))?;
    let record = state
        .memory
        .store(
            agent_id,
            req.content_type.unwrap_or(MemoryContentType::StoredKnowledge),
            req.content,
            req.importance,
            true,
            req.user_id,
            HashMap::new(),
            agent.memory_config.max_memories,
        )
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub id: Option<Uuid>,
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(agent_id): Path<Uuid>, Query(q): Query<DeleteQuery>) -> ApiResult<()> {
    state.memory.delete(agent_id, q.id).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    5
}

pub async fn search(State(state): State<Arc<AppState>>, Path(agent_id): Path<Uuid>, Json(req): Json<SearchRequest>) -> ApiResult<Json<Vec<Value>>> {
    let hits = state.memory.search(agent_id, &req.query, req.k, MemoryFilters::default()).await?;
    Ok(Json(
        hits.into_iter()
            .map(|h| serde_json::json!({"record": h.record, "score": h.score}))
            .collect(),
    ))
}

pub async fn stats(State(state): State<Arc<AppState>>, Path(agent_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let stats = state.memory.stats(agent_id).await?;
    Ok(Json(serde_json::json!({
        "count": stats.count,
        "average_importance": stats.average_importance,
        "oldest": stats.oldest,
        "newest": stats.newest,
        "by_content_type": stats.by_content_type,
    })))
}
