//! Typed persistence of services, agents, LLM profiles, memories, feedback
//! and demos (spec §6 "Persisted layout"). Any concrete database backend
//! should implement this trait; the only implementation shipped here talks
//! to MongoDB, per spec §6's `MONGODB_URL`/`DATABASE_NAME` environment.

use crate::error::{ErrorKind, UxmcpError};
use crate::log_sink::{LogEntry, LogQuery};
use crate::model::{Agent, LlmProfile, MemoryRecord, Service};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: uuid::Uuid,
    #[serde(default)]
    pub service_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub agent_id: Option<uuid::Uuid>,
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "crate::model::default_schema_version_for_log")]
    pub schema_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoRecord {
    pub id: uuid::Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<serde_json::Value>,
    #[serde(default = "crate::model::default_schema_version_for_log")]
    pub schema_version: u32,
}

/// Asynchronous document storage abstraction. A concrete backend
/// (MongoDB, or a fake for tests) implements this trait.
#[async_trait]
pub trait DocStore: Send + Sync + 'static {
    async fn put_service(&self, svc: &Service) -> Result<(), UxmcpError>;
    async fn get_service(&self, id: uuid::Uuid) -> Result<Option<Service>, UxmcpError>;
    async fn get_service_by_name(&self, name: &str) -> Result<Option<Service>, UxmcpError>;
    async fn list_services(&self) -> Result<Vec<Service>, UxmcpError>;
    async fn delete_service(&self, id: uuid::Uuid) -> Result<(), UxmcpError>;

    async fn put_agent(&self, agent: &Agent) -> Result<(), UxmcpError>;
    async fn get_agent(&self, id: uuid::Uuid) -> Result<Option<Agent>, UxmcpError>;
    async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>, UxmcpError>;
    async fn list_agents(&self) -> Result<Vec<Agent>, UxmcpError>;
    async fn delete_agent(&self, id: uuid::Uuid) -> Result<(), UxmcpError>;

    async fn put_profile(&self, profile: &LlmProfile) -> Result<(), UxmcpError>;
    async fn get_profile(&self, id: uuid::Uuid) -> Result<Option<LlmProfile>, UxmcpError>;
    async fn get_profile_by_name(&self, name: &str) -> Result<Option<LlmProfile>, UxmcpError>;
    async fn list_profiles(&self) -> Result<Vec<LlmProfile>, UxmcpError>;
    async fn delete_profile(&self, id: uuid::Uuid) -> Result<(), UxmcpError>;

    async fn put_memory(&self, record: &MemoryRecord) -> Result<(), UxmcpError>;
    async fn list_memories(&self, agent_id: uuid::Uuid) -> Result<Vec<MemoryRecord>, UxmcpError>;
    async fn delete_memory(&self, agent_id: uuid::Uuid, id: Option<uuid::Uuid>) -> Result<(), UxmcpError>;

    async fn put_feedback(&self, record: &FeedbackRecord) -> Result<(), UxmcpError>;
    async fn list_feedback(&self) -> Result<Vec<FeedbackRecord>, UxmcpError>;

    async fn put_demo(&self, record: &DemoRecord) -> Result<(), UxmcpError>;
    async fn list_demos(&self) -> Result<Vec<DemoRecord>, UxmcpError>;

    async fn insert_log(&self, entry: LogEntry) -> Result<(), UxmcpError>;
    async fn query_logs(&self, query: LogQuery) -> Result<Vec<LogEntry>, UxmcpError>;
    async fn delete_logs(&self, service_id: Option<uuid::Uuid>, older_than: DateTime<Utc>) -> Result<u64, UxmcpError>;
}

/// MongoDB-backed implementation, connected via `MONGODB_URL`/`DATABASE_NAME`.
#[derive(Clone)]
pub struct MongoDocStore {
    db: Database,
}

impl MongoDocStore {
    pub async fn connect(url: &str, db_name: &str) -> Result<Self, UxmcpError> {
        let client = Client::with_uri_str(url)
            .await
            .map_err(|e| UxmcpError::new(ErrorKind::StoreUnavailable, e.to_string()))?;
        // Fail fast on an unreachable store (spec §6 exit code 2 on boot).
        client
            .database(db_name)
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| UxmcpError::new(ErrorKind::StoreUnavailable, e.to_string()))?;
        Ok(Self {
            db: client.database(db_name),
        })
    }

    fn services(&self) -> Collection<Service> {
        self.db.collection("services")
    }
    fn agents(&self) -> Collection<Agent> {
        self.db.collection("agents")
    }
    fn profiles(&self) -> Collection<LlmProfile> {
        self.db.collection("llm_profiles")
    }
    fn memories(&self) -> Collection<MemoryRecord> {
        self.db.collection("memories")
    }
    fn feedback(&self) -> Collection<FeedbackRecord> {
        self.db.collection("feedback")
    }
    fn demos(&self) -> Collection<DemoRecord> {
        self.db.collection("demos")
    }
    fn logs(&self) -> Collection<LogEntry> {
        self.db.collection("logs")
    }
}

fn uuid_filter(field: &str, id: uuid::Uuid) -> Document {
    doc! { field: id.to_string() }
}

#[async_trait]
impl DocStore for MongoDocStore {
    async fn put_service(&self, svc: &Service) -> Result<(), UxmcpError> {
        self.services()
            .replace_one(uuid_filter("id", svc.id), svc)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get_service(&self, id: uuid::Uuid) -> Result<Option<Service>, UxmcpError> {
        Ok(self.services().find_one(uuid_filter("id", id)).await?)
    }

    async fn get_service_by_name(&self, name: &str) -> Result<Option<Service>, UxmcpError> {
        Ok(self.services().find_one(doc! {"name": name}).await?)
    }

    async fn list_services(&self) -> Result<Vec<Service>, UxmcpError> {
        use futures::TryStreamExt;
        Ok(self.services().find(doc! {}).await?.try_collect().await?)
    }

    async fn delete_service(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        self.services().delete_one(uuid_filter("id", id)).await?;
        Ok(())
    }

    async fn put_agent(&self, agent: &Agent) -> Result<(), UxmcpError> {
        self.agents()
            .replace_one(uuid_filter("id", agent.id), agent)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get_agent(&self, id: uuid::Uuid) -> Result<Option<Agent>, UxmcpError> {
        Ok(self.agents().find_one(uuid_filter("id", id)).await?)
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>, UxmcpError> {
        Ok(self.agents().find_one(doc! {"name": name}).await?)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, UxmcpError> {
        use futures::TryStreamExt;
        Ok(self.agents().find(doc! {}).await?.try_collect().await?)
    }

    async fn delete_agent(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        self.agents().delete_one(uuid_filter("id", id)).await?;
        Ok(())
    }

    async fn put_profile(&self, profile: &LlmProfile) -> Result<(), UxmcpError> {
        self.profiles()
            .replace_one(uuid_filter("id", profile.id), profile)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get_profile(&self, id: uuid::Uuid) -> Result<Option<LlmProfile>, UxmcpError> {
        Ok(self.profiles().find_one(uuid_filter("id", id)).await?)
    }

    async fn get_profile_by_name(&self, name: &str) -> Result<Option<LlmProfile>, UxmcpError> {
        Ok(self.profiles().find_one(doc! {"name": name}).await?)
    }

    async fn list_profiles(&self) -> Result<Vec<LlmProfile>, UxmcpError> {
        use futures::TryStreamExt;
        Ok(self.profiles().find(doc! {}).await?.try_collect().await?)
    }

    async fn delete_profile(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        self.profiles().delete_one(uuid_filter("id", id)).await?;
        Ok(())
    }

    async fn put_memory(&self, record: &MemoryRecord) -> Result<(), UxmcpError> {
        self.memories()
            .replace_one(uuid_filter("id", record.id), record)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn list_memories(&self, agent_id: uuid::Uuid) -> Result<Vec<MemoryRecord>, UxmcpError> {
        use futures::TryStreamExt;
        Ok(self
            .memories()
            .find(doc! {"agent_id": agent_id.to_string()})
            .await?
            .try_collect()
            .await?)
    }

    async fn delete_memory(&self, agent_id: uuid::Uuid, id: Option<uuid::Uuid>) -> Result<(), UxmcpError> {
        let filter = match id {
            Some(id) => doc! {"agent_id": agent_id.to_string(), "id": id.to_string()},
            None => doc! {"agent_id": agent_id.to_string()},
        };
        self.memories().delete_many(filter).await?;
        Ok(())
    }

    async fn put_feedback(&self, record: &FeedbackRecord) -> Result<(), UxmcpError> {
        self.feedback().insert_one(record).await?;
        Ok(())
    }

    async fn list_feedback(&self) -> Result<Vec<FeedbackRecord>, UxmcpError> {
        use futures::TryStreamExt;
        Ok(self.feedback().find(doc! {}).await?.try_collect().await?)
    }

    async fn put_demo(&self, record: &DemoRecord) -> Result<(), UxmcpError> {
        self.demos()
            .replace_one(uuid_filter("id", record.id), record)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn list_demos(&self) -> Result<Vec<DemoRecord>, UxmcpError> {
        use futures::TryStreamExt;
        Ok(self.demos().find(doc! {}).await?.try_collect().await?)
    }

    async fn insert_log(&self, entry: LogEntry) -> Result<(), UxmcpError> {
        self.logs().insert_one(entry).await?;
        Ok(())
    }

    async fn query_logs(&self, query: LogQuery) -> Result<Vec<LogEntry>, UxmcpError> {
        use futures::TryStreamExt;
        use mongodb::options::FindOptions;

        let mut filter = Document::new();
        if let Some(level) = &query.level {
            filter.insert("level", bson::to_bson(level)?);
        }
        if let Some(module) = &query.module {
            filter.insert("module", module);
        }
        if let Some(text) = &query.text {
            filter.insert(
                "message",
                doc! {"$regex": regex_escape(text), "$options": "i"},
            );
        }
        if let Some(exec) = &query.execution_id {
            filter.insert("execution_id", exec);
        }
        if query.since.is_some() || query.until.is_some() {
            let mut range = Document::new();
            if let Some(since) = query.since {
                range.insert("$gte", bson::to_bson(&since)?);
            }
            if let Some(until) = query.until {
                range.insert("$lte", bson::to_bson(&until)?);
            }
            filter.insert("timestamp", range);
        }

        let skip = (query.page as u64) * (query.page_size as u64);
        let opts = FindOptions::builder()
            .sort(doc! {"timestamp": -1})
            .skip(skip)
            .limit(query.page_size as i64)
            .build();
        Ok(self.logs().find(filter).with_options(opts).await?.try_collect().await?)
    }

    async fn delete_logs(&self, service_id: Option<uuid::Uuid>, older_than: DateTime<Utc>) -> Result<u64, UxmcpError> {
        let mut filter = doc! {"timestamp": {"$lt": bson::to_bson(&older_than)?}};
        if let Some(id) = service_id {
            filter.insert("service_id", id.to_string());
        }
        let res = self.logs().delete_many(filter).await?;
        Ok(res.deleted_count)
    }
}

fn regex_escape(s: &str) -> String {
    regex::escape(s)
}
