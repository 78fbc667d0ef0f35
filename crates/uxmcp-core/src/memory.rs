//! Hybrid vector + document memory subsystem (spec §4.6).

use crate::doc_store::DocStore;
use crate::error::UxmcpError;
use crate::model::{MemoryContentType, MemoryRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default importance applied to conversation turns written implicitly by
/// the executor (spec §4.4, §4.6).
pub const DEFAULT_CONVERSATION_IMPORTANCE: f32 = 0.5;
/// Default importance for an explicit `memory_store` call with no override.
pub const DEFAULT_EXPLICIT_IMPORTANCE: f32 = 0.7;
/// Default importance for `stored_knowledge` records.
pub const DEFAULT_KNOWLEDGE_IMPORTANCE: f32 = 0.9;

/// Minimum cosine-similarity score the `memory_store`-then-`memory_search`
/// law of spec §8 guarantees under the default embedding.
pub const MIN_SEARCH_SCORE_FLOOR: f32 = 0.4;

/// A filter set applied to `search`/`list` (spec §4.6).
#[derive(Debug, Default, Clone)]
pub struct MemoryFilters {
    pub content_types: Vec<MemoryContentType>,
    pub min_importance: Option<f32>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl MemoryFilters {
    fn matches(&self, record: &MemoryRecord) -> bool {
        if !self.content_types.is_empty() && !self.content_types.contains(&record.content_type) {
            return false;
        }
        if let Some(floor) = self.min_importance {
            if record.importance < floor {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at > until {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub count: usize,
    pub average_importance: f32,
    pub by_content_type: HashMap<MemoryContentType, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Embeds text into a fixed-width vector. The subsystem is agnostic to the
/// concrete model; callers plug in a real embedding provider at the
/// Completion Interface boundary (spec §4.6 "configured model").
#[async_trait::async_trait]
pub trait Embedder: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UxmcpError>;
}

/// Deterministic bag-of-hashed-tokens embedder. Good enough to exercise the
/// subsystem's ranking and retention logic without a network round-trip;
/// production deployments bind a real provider via [`Embedder`].
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UxmcpError> {
        let mut v = vec![0f32; self.dims];
        for token in text.split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::hash::Hash::hash(&token.to_lowercase(), &mut hasher);
            let idx = (std::hash::Hasher::finish(&hasher) as usize) % self.dims;
            v[idx] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Owns vector + document consistency per agent. Writes are serialised
/// under a per-agent lock (spec §4.6, §5 "Memory index: one lock per agent").
pub struct MemorySubsystem {
    store: Arc<dyn DocStore>,
    embedder: Arc<dyn Embedder>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MemorySubsystem {
    pub fn new(store: Arc<dyn DocStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, agent_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(agent_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Default importance per spec §4.6: `stored_knowledge` is always 0.9;
    /// an explicit `memory_store` call is 0.7; an implicit conversation-turn
    /// write from the executor is 0.5.
    fn default_importance_for(content_type: MemoryContentType, explicit: bool) -> f32 {
        if content_type == MemoryContentType::StoredKnowledge {
            DEFAULT_KNOWLEDGE_IMPORTANCE
        } else if explicit {
            DEFAULT_EXPLICIT_IMPORTANCE
        } else {
            DEFAULT_CONVERSATION_IMPORTANCE
        }
    }

    /// Stores a record, embedding its content and enforcing `max_memories`
    /// retention afterwards (spec §4.6, invariant 4 of §8). `explicit`
    /// distinguishes a caller-initiated `memory_store` from an implicit
    /// conversation-turn write by the executor.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        agent_id: Uuid,
        content_type: MemoryContentType,
        content: serde_json::Value,
        importance: Option<f32>,
        explicit: bool,
        user_id: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
        max_memories: usize,
    ) -> Result<MemoryRecord, UxmcpError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;

        let text = content_as_text(&content);
        let embedding = self.embedder.embed(&text).await?;
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            agent_id,
            content_type,
            content,
            importance: importance.unwrap_or_else(|| Self::default_importance_for(content_type, explicit)).clamp(0.0, 1.0),
            created_at: Utc::now(),
            user_id,
            metadata,
            embedding,
            schema_version: crate::model::CURRENT_SCHEMA_VERSION,
        };
        self.store.put_memory(&record).await?;
        self.enforce_retention(agent_id, max_memories).await?;
        Ok(record)
    }

    /// Evicts lowest-importance, then oldest, records beyond `max_memories`.
    async fn enforce_retention(&self, agent_id: Uuid, max_memories: usize) -> Result<(), UxmcpError> {
        let mut records = self.store.list_memories(agent_id).await?;
        if records.len() <= max_memories {
            return Ok(());
        }
        records.sort_by(|a, b| {
            a.importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.created_at.cmp(&b.created_at))
        });
        let overflow = records.len() - max_memories;
        for record in records.into_iter().take(overflow) {
            self.store.delete_memory(agent_id, Some(record.id)).await?;
        }
        Ok(())
    }

    /// Embeds `query` and ranks the agent's records by cosine similarity,
    /// breaking ties by importance then recency (spec §4.6).
    pub async fn search(
        &self,
        agent_id: Uuid,
        query: &str,
        k: usize,
        filters: MemoryFilters,
    ) -> Result<Vec<ScoredMemory>, UxmcpError> {
        let query_embedding = self.embedder.embed(query).await?;
        let records = self.store.list_memories(agent_id).await?;

        let mut scored: Vec<ScoredMemory> = records
            .into_iter()
            .filter(|r| filters.matches(r))
            .map(|record| {
                let score = cosine_similarity(&query_embedding, &record.embedding);
                ScoredMemory { record, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.record
                        .importance
                        .partial_cmp(&a.record.importance)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.record.created_at.cmp(&a.record.created_at))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub async fn list(
        &self,
        agent_id: Uuid,
        filters: MemoryFilters,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryRecord>, UxmcpError> {
        let mut records = self.store.list_memories(agent_id).await?;
        records.retain(|r| filters.matches(r));
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    pub async fn delete(&self, agent_id: Uuid, id: Option<Uuid>) -> Result<(), UxmcpError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        self.store.delete_memory(agent_id, id).await
    }

    pub async fn stats(&self, agent_id: Uuid) -> Result<MemoryStats, UxmcpError> {
        let records = self.store.list_memories(agent_id).await?;
        if records.is_empty() {
            return Ok(MemoryStats::default());
        }
        let mut by_content_type: HashMap<MemoryContentType, usize> = HashMap::new();
        let mut sum = 0f32;
        let mut oldest = records[0].created_at;
        let mut newest = records[0].created_at;
        for r in &records {
            *by_content_type.entry(r.content_type).or_insert(0) += 1;
            sum += r.importance;
            oldest = oldest.min(r.created_at);
            newest = newest.max(r.created_at);
        }
        Ok(MemoryStats {
            count: records.len(),
            average_importance: sum / records.len() as f32,
            by_content_type,
            oldest: Some(oldest),
            newest: Some(newest),
        })
    }
}

fn content_as_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryDocStore;

    fn store() -> Arc<dyn DocStore> {
        Arc::new(InMemoryDocStore::default())
    }

    #[tokio::test]
    async fn s6_retention_evicts_lowest_importance() {
        let mem = MemorySubsystem::new(store(), Arc::new(HashingEmbedder::default()));
        let agent_id = Uuid::new_v4();
        for importance in [0.9, 0.9, 0.5, 0.9] {
            mem.store(
                agent_id,
                MemoryContentType::Conversation,
                serde_json::json!(format!("note {importance}")),
                Some(importance),
                false,
                None,
                HashMap::new(),
                3,
            )
            .await
            .unwrap();
        }
        let remaining = mem.list(agent_id, MemoryFilters::default(), None).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|r| r.importance == 0.9));
    }

    #[tokio::test]
    async fn store_then_search_returns_above_floor() {
        let mem = MemorySubsystem::new(store(), Arc::new(HashingEmbedder::default()));
        let agent_id = Uuid::new_v4();
        mem.store(
            agent_id,
            MemoryContentType::StoredKnowledge,
            serde_json::json!("the quick brown fox jumps over the lazy dog"),
            None,
            true,
            None,
            HashMap::new(),
            500,
        )
        .await
        .unwrap();

        let hits = mem
            .search(agent_id, "the quick brown fox jumps over the lazy dog", 1, MemoryFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score >= MIN_SEARCH_SCORE_FLOOR);
    }

    #[tokio::test]
    async fn default_importance_matches_content_type_table() {
        let mem = MemorySubsystem::new(store(), Arc::new(HashingEmbedder::default()));
        let agent_id = Uuid::new_v4();
        let knowledge = mem
            .store(agent_id, MemoryContentType::StoredKnowledge, serde_json::json!("x"), None, true, None, HashMap::new(), 500)
            .await
            .unwrap();
        assert_eq!(knowledge.importance, DEFAULT_KNOWLEDGE_IMPORTANCE);

        let turn = mem
            .store(agent_id, MemoryContentType::UserMessage, serde_json::json!("hi"), None, false, None, HashMap::new(), 500)
            .await
            .unwrap();
        assert_eq!(turn.importance, DEFAULT_CONVERSATION_IMPORTANCE);

        let explicit_pref = mem
            .store(agent_id, MemoryContentType::Preference, serde_json::json!("likes tea"), None, true, None, HashMap::new(), 500)
            .await
            .unwrap();
        assert_eq!(explicit_pref.importance, DEFAULT_EXPLICIT_IMPORTANCE);
    }
}
