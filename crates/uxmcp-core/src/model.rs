//! Core data model (spec §3): services, agents, LLM profiles, memory
//! records, execution traces and route table entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ServiceId = uuid::Uuid;
pub type AgentId = uuid::Uuid;
pub type ProfileId = uuid::Uuid;
pub type MemoryId = uuid::Uuid;

/// The schema version stamped on every persisted document (spec §6, §12).
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Tool,
    Resource,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// The activation state machine of spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationState {
    Draft,
    Validated,
    Active,
}

/// A registry entry of kind tool, resource, or prompt (spec §3 "Service").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub kind: ServiceKind,
    pub name: String,
    pub route: String,
    pub method: HttpMethod,
    pub params: Vec<ServiceParam>,
    pub code: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    /// Resource mime-type; meaningful only for `ServiceKind::Resource`.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Prompt template; meaningful only for `ServiceKind::Prompt`.
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub prompt_args: Vec<String>,
    #[serde(default)]
    pub llm_profile: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub documentation: String,
    pub state: ActivationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

impl Service {
    pub fn active(&self) -> bool {
        self.state == ActivationState::Active
    }
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

/// Public alias of [`default_schema_version`] for use as a serde default in
/// other modules (e.g. the log sink).
pub fn default_schema_version_for_log() -> u32 {
    CURRENT_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub allow_parallel_tool_calls: bool,
    #[serde(default)]
    pub require_tool_use: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    5
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            allow_parallel_tool_calls: false,
            require_tool_use: false,
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityBlock {
    #[serde(default)]
    pub backstory: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalityTraits {
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub verbosity: Option<String>,
    #[serde(default)]
    pub empathy: Option<String>,
    #[serde(default)]
    pub humor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPolicies {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub require_confirmation: Vec<String>,
    #[serde(default)]
    pub auto_correct_errors: bool,
    #[serde(default)]
    pub explain_decisions: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_max_retries() -> u32 {
    3
}

impl Default for DecisionPolicies {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            require_confirmation: Vec::new(),
            auto_correct_errors: false,
            explain_decisions: false,
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningStrategy {
    Standard,
    ChainOfThought,
    TreeOfThought,
}

impl Default for ReasoningStrategy {
    fn default() -> Self {
        ReasoningStrategy::Standard
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_memories")]
    pub max_memories: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_search_k")]
    pub search_k: usize,
}

fn default_max_memories() -> usize {
    500
}
fn default_embedding_model() -> String {
    "default".to_string()
}
fn default_search_k() -> usize {
    5
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories: default_max_memories(),
            embedding_model: default_embedding_model(),
            search_k: default_search_k(),
        }
    }
}

/// `"text"` or a literal JSON-schema object (spec §3 "Agent").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaOrText {
    Text(String),
    Schema(serde_json::Value),
}

impl SchemaOrText {
    pub fn is_text(&self) -> bool {
        matches!(self, SchemaOrText::Text(s) if s == "text")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    pub llm_profile: String,
    /// Ordered list of allowed service names the agent may call as tools.
    pub mcp_services: Vec<String>,
    pub system_prompt: String,
    #[serde(default)]
    pub pre_prompt: String,
    pub input_schema: SchemaOrText,
    pub output_schema: SchemaOrText,
    #[serde(default)]
    pub execution_policy: ExecutionPolicy,
    #[serde(default)]
    pub identity: IdentityBlock,
    #[serde(default)]
    pub memory_enabled: bool,
    #[serde(default)]
    pub memory_config: MemoryConfig,
    #[serde(default)]
    pub reasoning_strategy: ReasoningStrategy,
    #[serde(default)]
    pub personality: PersonalityTraits,
    #[serde(default)]
    pub decision_policies: DecisionPolicies,
    pub state: ActivationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

impl Agent {
    pub fn active(&self) -> bool {
        self.state == ActivationState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    Text,
    Json,
    Markdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProfile {
    pub id: ProfileId,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub base_endpoint: Option<String>,
    pub api_key: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub mode: CompletionMode,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub active: bool,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryContentType {
    UserMessage,
    AgentResponse,
    Preference,
    StoredKnowledge,
    Conversation,
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub agent_id: AgentId,
    pub content_type: MemoryContentType,
    pub content: serde_json::Value,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub embedding: Vec<f32>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallTrace {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Success,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub execution_id: String,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub iterations: u32,
    pub tool_calls: Vec<ToolCallTrace>,
    pub usage: Usage,
    pub status: TraceStatus,
    #[serde(default)]
    pub error_kind: Option<crate::error::ErrorKind>,
}

/// A compiled route table entry (spec §3 "Route Table Entry").
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub method: HttpMethod,
    pub pattern: RoutePattern,
    pub service_id: ServiceId,
    pub mounted_at: DateTime<Utc>,
}

/// A compiled `/path/{param}` pattern, produced once at mount time.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    pub raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl RoutePattern {
    /// Compiles `raw` into segments, validating it starts with `/`.
    pub fn compile(raw: &str) -> Result<Self, crate::error::UxmcpError> {
        if !raw.starts_with('/') {
            return Err(crate::error::UxmcpError::with_field(
                crate::error::ErrorKind::ValidationFailed,
                "route",
                "route must start with '/'",
            ));
        }
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Names of every `{param}` placeholder, in order.
    pub fn param_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Matches `path` against this pattern, returning bound path parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut bound = HashMap::new();
        for (seg, part) in self.segments.iter().zip(parts.iter()) {
            match seg {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    bound.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(bound)
    }
}

impl PartialEq for RoutePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

pub static NAME_RE_SOURCE: &str = r"^[A-Za-z0-9_-]+$";
