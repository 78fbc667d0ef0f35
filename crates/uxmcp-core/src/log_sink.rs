//! Append-only, execution-scoped structured event store (spec §4.8).

use crate::doc_store::DocStore;
use crate::error::UxmcpError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub module: String,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub agent_id: Option<uuid::Uuid>,
    #[serde(default = "crate::model::default_schema_version_for_log")]
    pub schema_version: u32,
}

#[derive(Debug, Default)]
pub struct LogQuery {
    pub level: Option<LogLevel>,
    pub module: Option<String>,
    pub text: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub execution_id: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

const MAX_PAGE_SIZE: u32 = 1000;
const MAX_DELETE_AGE_DAYS: i64 = 365;

/// Append-only structured log store, backed by the Document Store.
///
/// Every component in this workspace logs through here in addition to
/// emitting a `tracing` event (spec §12/SPEC_FULL.md §11.1): `tracing` is
/// the process-local channel, this is the queryable execution-scoped
/// record the `/logs` endpoint serves.
pub struct LogSink {
    store: Arc<dyn DocStore>,
}

impl LogSink {
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, entry: LogEntry) -> Result<(), UxmcpError> {
        self.store.insert_log(entry).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        level: LogLevel,
        module: &str,
        message: impl Into<String>,
        details: HashMap<String, serde_json::Value>,
        execution_id: Option<String>,
        service_id: Option<uuid::Uuid>,
        agent_id: Option<uuid::Uuid>,
    ) -> Result<(), UxmcpError> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            module: module.to_string(),
            message: message.into(),
            details,
            execution_id,
            service_id,
            agent_id,
            schema_version: crate::model::CURRENT_SCHEMA_VERSION,
        };
        self.append(entry).await
    }

    pub async fn query(&self, mut q: LogQuery) -> Result<Vec<LogEntry>, UxmcpError> {
        if q.page_size == 0 || q.page_size > MAX_PAGE_SIZE {
            q.page_size = MAX_PAGE_SIZE;
        }
        self.store.query_logs(q).await
    }

    /// Bulk deletion by service id and age in days (spec §4.8, capped at 365 days).
    pub async fn delete(
        &self,
        service_id: Option<uuid::Uuid>,
        older_than_days: i64,
    ) -> Result<u64, UxmcpError> {
        let days = older_than_days.min(MAX_DELETE_AGE_DAYS).max(0);
        let cutoff = Utc::now() - Duration::days(days);
        self.store.delete_logs(service_id, cutoff).await
    }
}
