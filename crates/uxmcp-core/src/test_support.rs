//! In-memory `DocStore` fake used by this workspace's unit tests. Exposed
//! outside this crate behind the `test-support` feature so other crates'
//! tests can build a `Registry`/`MemorySubsystem`/`LogSink` without Mongo.

use crate::doc_store::{DemoRecord, DocStore, FeedbackRecord};
use crate::error::UxmcpError;
use crate::log_sink::{LogEntry, LogQuery};
use crate::model::{Agent, LlmProfile, MemoryRecord, Service};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryDocStore {
    services: Mutex<HashMap<uuid::Uuid, Service>>,
    agents: Mutex<HashMap<uuid::Uuid, Agent>>,
    profiles: Mutex<HashMap<uuid::Uuid, LlmProfile>>,
    memories: Mutex<HashMap<uuid::Uuid, MemoryRecord>>,
    feedback: Mutex<Vec<FeedbackRecord>>,
    demos: Mutex<HashMap<uuid::Uuid, DemoRecord>>,
    logs: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl DocStore for InMemoryDocStore {
    async fn put_service(&self, svc: &Service) -> Result<(), UxmcpError> {
        self.services.lock().await.insert(svc.id, svc.clone());
        Ok(())
    }

    async fn get_service(&self, id: uuid::Uuid) -> Result<Option<Service>, UxmcpError> {
        Ok(self.services.lock().await.get(&id).cloned())
    }

    async fn get_service_by_name(&self, name: &str) -> Result<Option<Service>, UxmcpError> {
        Ok(self.services.lock().await.values().find(|s| s.name == name).cloned())
    }

    async fn list_services(&self) -> Result<Vec<Service>, UxmcpError> {
        Ok(self.services.lock().await.values().cloned().collect())
    }

    async fn delete_service(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        self.services.lock().await.remove(&id);
        Ok(())
    }

    async fn put_agent(&self, agent: &Agent) -> Result<(), UxmcpError> {
        self.agents.lock().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: uuid::Uuid) -> Result<Option<Agent>, UxmcpError> {
        Ok(self.agents.lock().await.get(&id).cloned())
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>, UxmcpError> {
        Ok(self.agents.lock().await.values().find(|a| a.name == name).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, UxmcpError> {
        Ok(self.agents.lock().await.values().cloned().collect())
    }

    async fn delete_agent(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        self.agents.lock().await.remove(&id);
        Ok(())
    }

    async fn put_profile(&self, profile: &LlmProfile) -> Result<(), UxmcpError> {
        self.profiles.lock().await.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn get_profile(&self, id: uuid::Uuid) -> Result<Option<LlmProfile>, UxmcpError> {
        Ok(self.profiles.lock().await.get(&id).cloned())
    }

    async fn get_profile_by_name(&self, name: &str) -> Result<Option<LlmProfile>, UxmcpError> {
        Ok(self.profiles.lock().await.values().find(|p| p.name == name).cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<LlmProfile>, UxmcpError> {
        Ok(self.profiles.lock().await.values().cloned().collect())
    }

    async fn delete_profile(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        self.profiles.lock().await.remove(&id);
        Ok(())
    }

    async fn put_memory(&self, record: &MemoryRecord) -> Result<(), UxmcpError> {
        self.memories.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_memories(&self, agent_id: uuid::Uuid) -> Result<Vec<MemoryRecord>, UxmcpError> {
        Ok(self
            .memories
            .lock()
            .await
            .values()
            .filter(|m| m.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn delete_memory(&self, agent_id: uuid::Uuid, id: Option<uuid::Uuid>) -> Result<(), UxmcpError> {
        let mut guard = self.memories.lock().await;
        match id {
            Some(id) => {
                guard.remove(&id);
            }
            None => guard.retain(|_, m| m.agent_id != agent_id),
        }
        Ok(())
    }

    async fn put_feedback(&self, record: &FeedbackRecord) -> Result<(), UxmcpError> {
        self.feedback.lock().await.push(record.clone());
        Ok(())
    }

    async fn list_feedback(&self) -> Result<Vec<FeedbackRecord>, UxmcpError> {
        Ok(self.feedback.lock().await.clone())
    }

    async fn put_demo(&self, record: &DemoRecord) -> Result<(), UxmcpError> {
        self.demos.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_demos(&self) -> Result<Vec<DemoRecord>, UxmcpError> {
        Ok(self.demos.lock().await.values().cloned().collect())
    }

    async fn insert_log(&self, entry: LogEntry) -> Result<(), UxmcpError> {
        self.logs.lock().await.push(entry);
        Ok(())
    }

    async fn query_logs(&self, query: LogQuery) -> Result<Vec<LogEntry>, UxmcpError> {
        let guard = self.logs.lock().await;
        let mut matched: Vec<LogEntry> = guard
            .iter()
            .filter(|e| query.level.map(|l| l == e.level).unwrap_or(true))
            .filter(|e| query.module.as_ref().map(|m| m == &e.module).unwrap_or(true))
            .filter(|e| {
                query
                    .text
                    .as_ref()
                    .map(|t| e.message.to_lowercase().contains(&t.to_lowercase()))
                    .unwrap_or(true)
            })
            .filter(|e| query.execution_id.as_ref().map(|x| Some(x) == e.execution_id.as_ref()).unwrap_or(true))
            .filter(|e| query.since.map(|s| e.timestamp >= s).unwrap_or(true))
            .filter(|e| query.until.map(|u| e.timestamp <= u).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let start = (query.page as usize) * (query.page_size.max(1) as usize);
        Ok(matched.into_iter().skip(start).take(query.page_size.max(1) as usize).collect())
    }

    async fn delete_logs(&self, service_id: Option<uuid::Uuid>, older_than: DateTime<Utc>) -> Result<u64, UxmcpError> {
        let mut guard = self.logs.lock().await;
        let before = guard.len();
        guard.retain(|e| {
            let age_ok = e.timestamp >= older_than;
            let scope_ok = service_id.map(|id| e.service_id != Some(id)).unwrap_or(true);
            age_ok || scope_ok
        });
        Ok((before - guard.len()) as u64)
    }
}
