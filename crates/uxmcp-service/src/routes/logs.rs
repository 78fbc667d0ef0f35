use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use uxmcp_core::log_sink::{LogEntry, LogLevel, LogQuery};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    pub level: Option<LogLevel>,
    pub module: Option<String>,
    pub text: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub execution_id: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

pub async fn list(State(state): State<Arc<AppState>>, Query(q): Query<LogsQuery>) -> ApiResult<Json<Vec<LogEntry>>> {
    let entries = state
        .log
        .query(LogQuery {
            level: q.level,
            module: q.module,
            text: q.text,
            since: q.since,
            until: q.until,
            execution_id: q.execution_id,
            page: q.page,
            page_size: q.page_size,
        })
        .await?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteQuery {
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub older_than_days: i64,
}

pub async fn delete(State(state): State<Arc<AppState>>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<u64>> {
    Ok(Json(state.log.delete(q.service_id, q.older_than_days).await?))
}
