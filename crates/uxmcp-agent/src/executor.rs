//! Bounded, cancellable tool-call executor loop (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use uxmcp_codehost::{CodeHost, ExecutionRequest as HandlerRequest};
use uxmcp_core::completion::{CompletionInterface, CompletionMode as WireMode, CompletionRequest, Message, MessageRole, ToolSpec};
use uxmcp_core::error::{ErrorKind, UxmcpError};
use uxmcp_core::log_sink::{LogLevel, LogSink};
use uxmcp_core::mcp_surface::synthesize_input_schema;
use uxmcp_core::memory::{MemoryFilters, MemorySubsystem};
use uxmcp_core::model::{Agent, MemoryContentType, SchemaOrText, ServiceKind, ToolCallTrace, TraceStatus, Usage};
use uxmcp_core::registry::Registry;

use crate::providers::CompletionProviderFactory;
use tracing::instrument;

const MEMORY_SEARCH_TOOL: &str = "memory_search";
const MEMORY_STORE_TOOL: &str = "memory_store";
const MEMORY_ANALYZE_TOOL: &str = "memory_analyze";

pub struct ExecutionOptions {
    pub deadline: Duration,
    pub cancellation: CancellationToken,
    /// Conversation history preceding this call; empty for a fresh session.
    pub history: Vec<Message>,
}

impl Default for ExecutionOptions {
    /// Default agent deadline of 60s (spec §5).
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            cancellation: CancellationToken::new(),
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub output: Value,
    pub tool_calls: Vec<ToolCallTrace>,
    pub iterations: u32,
    pub usage: Usage,
    pub success: bool,
    pub error: Option<ErrorKind>,
}

/// Drives the tool-call loop described in spec §4.4 for a single agent
/// invocation. One executor instance is shared across concurrent
/// executions; all per-execution state lives on the stack of [`execute`].
pub struct AgentExecutor {
    registry: Arc<Registry>,
    code_host: Arc<CodeHost>,
    memory: Arc<MemorySubsystem>,
    providers: Arc<dyn CompletionProviderFactory>,
    log: Arc<LogSink>,
}

impl AgentExecutor {
    pub fn new(
        registry: Arc<Registry>,
        code_host: Arc<CodeHost>,
        memory: Arc<MemorySubsystem>,
        providers: Arc<dyn CompletionProviderFactory>,
        log: Arc<LogSink>,
    ) -> Self {
        Self { registry, code_host, memory, providers, log }
    }

    #[instrument(name = "executor.execute", skip(self, input, options), fields(agent = %agent.name, execution_id))]
    pub async fn execute(&self, agent: &Agent, input: Value, options: ExecutionOptions) -> Result<ExecutionResult, UxmcpError> {
        let execution_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("execution_id", &execution_id.as_str());
        let started_at = Instant::now();
        let deadline_at = started_at + options.deadline;

        let profile = self
            .registry
            .get_profile_by_name(&agent.llm_profile)
            .await
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownProfile, agent.llm_profile.clone()))?;
        let provider = self.providers.build(&profile)?;
        let completion = CompletionInterface::new(provider);

        let user_turn_text = self.render_input(agent, &input).await?;
        let mut conversation = options.history;
        conversation.push(Message::user(user_turn_text.clone()));

        let system_message = self.build_system_message(agent, &user_turn_text).await;
        let mut messages = vec![system_message];
        messages.extend(conversation.clone());

        let tools = self.build_tool_specs(agent).await;
        let mut usage = Usage::default();
        let mut trace: Vec<ToolCallTrace> = Vec::new();
        let mut reprompted_for_required_tool = false;
        let mut explicit_store_happened = false;
        let mut last_partial: Option<String> = None;

        for iteration in 1..=agent.execution_policy.max_iterations {
            tracing::debug!(execution_id = %execution_id, iteration, "agent iteration starting");
            if options.cancellation.is_cancelled() || Instant::now() >= deadline_at {
                return self.finish_cancelled(&execution_id, &trace, usage, iteration, last_partial).await;
            }

            let req = CompletionRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                mode: WireMode::ToolCalling,
                temperature: agent.execution_policy.temperature,
                max_tokens: agent.execution_policy.max_tokens,
            };
            let resp = match completion.complete(req).await {
                Ok(r) => r,
                Err(e) => return self.finish_error(&execution_id, &trace, usage, iteration, e).await,
            };
            usage.prompt += resp.usage.prompt;
            usage.completion += resp.usage.completion;
            usage.total += resp.usage.total;

            if resp.tool_calls.is_empty() {
                if agent.execution_policy.require_tool_use && iteration == 1 && !reprompted_for_required_tool {
                    reprompted_for_required_tool = true;
                    messages.push(Message::user("You must call one of the available tools before replying."));
                    continue;
                }
                if agent.execution_policy.require_tool_use && reprompted_for_required_tool {
                    return self
                        .finish_error(&execution_id, &trace, usage, iteration, UxmcpError::new(ErrorKind::RequiredToolMissing, "model returned no tool call after a forced re-prompt"))
                        .await;
                }

                let final_text = resp.message.clone().unwrap_or_default();
                return self
                    .finalize_normal(agent, &execution_id, &trace, usage, iteration, &mut messages, &completion, final_text, user_turn_text, explicit_store_happened)
                    .await;
            }

            last_partial = resp.message.clone();
            messages.push(Message {
                role: MessageRole::Assistant,
                content: resp.message.clone(),
                tool_call_id: None,
                tool_calls: resp.tool_calls.clone(),
            });

            let call_started_at = Utc::now();
            let call_started = Instant::now();
            let dispatched = if agent.execution_policy.allow_parallel_tool_calls {
                let futures = resp.tool_calls.iter().map(|tc| self.dispatch_tool(agent, tc.name.clone(), tc.arguments.clone(), &execution_id));
                futures::future::join_all(futures).await
            } else {
                let mut results = Vec::with_capacity(resp.tool_calls.len());
                for tc in &resp.tool_calls {
                    results.push(self.dispatch_tool(agent, tc.name.clone(), tc.arguments.clone(), &execution_id).await);
                }
                results
            };
            let duration_ms = call_started.elapsed().as_millis() as u64;

            for (tc, result) in resp.tool_calls.iter().zip(dispatched.into_iter()) {
                if tc.name == MEMORY_STORE_TOOL && result.is_ok() {
                    explicit_store_happened = true;
                }
                let (result_value, response_text) = match result {
                    Ok(v) => (v.clone(), v.to_string()),
                    Err(e) => (serde_json::json!({"error": e.kind, "detail": e.detail}), e.detail.clone()),
                };
                trace.push(ToolCallTrace {
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                    result: result_value,
                    started_at: call_started_at,
                    duration_ms,
                });
                messages.push(Message::tool_response(tc.id.clone(), response_text));
            }
        }

        self.finish_exhausted(&execution_id, &trace, usage, agent.execution_policy.max_iterations, last_partial).await
    }

    async fn render_input(&self, agent: &Agent, input: &Value) -> Result<String, UxmcpError> {
        match &agent.input_schema {
            SchemaOrText::Text(s) if s == "text" => Ok(input.as_str().map(|s| s.to_string()).unwrap_or_else(|| input.to_string())),
            SchemaOrText::Text(_) | SchemaOrText::Schema(_) => {
                let schema = match &agent.input_schema {
                    SchemaOrText::Schema(s) => s.clone(),
                    SchemaOrText::Text(s) => serde_json::from_str(s).unwrap_or(Value::Null),
                };
                if let Ok(validator) = jsonschema::validator_for(&schema) {
                    if !validator.is_valid(input) {
                        return Err(UxmcpError::with_field(ErrorKind::ValidationFailed, "input", "input does not validate against the agent's input_schema"));
                    }
                }
                Ok(input.to_string())
            }
        }
    }

    async fn build_system_message(&self, agent: &Agent, query: &str) -> Message {
        let mut sections = vec![agent.system_prompt.clone()];
        if !agent.pre_prompt.is_empty() {
            sections.push(agent.pre_prompt.clone());
        }
        if !agent.identity.backstory.is_empty() {
            sections.push(format!("Backstory:\n{}", agent.identity.backstory));
        }
        if !agent.identity.objectives.is_empty() {
            sections.push(format!("Objectives:\n{}", bulleted(&agent.identity.objectives)));
        }
        if !agent.identity.constraints.is_empty() {
            sections.push(format!("Constraints:\n{}", bulleted(&agent.identity.constraints)));
        }
        sections.push(personality_directives(agent));
        sections.push(reasoning_preamble(agent));

        if agent.memory_enabled {
            let hits = self
                .memory
                .search(agent.id, query, agent.memory_config.search_k, MemoryFilters::default())
                .await
                .unwrap_or_default();
            if !hits.is_empty() {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|h| format!("- ({:.2}) {}", h.score, content_preview(&h.record.content)))
                    .collect();
                sections.push(format!("Relevant memories:\n{}", lines.join("\n")));
            }
        }

        Message::system(sections.into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n\n"))
    }

    async fn build_tool_specs(&self, agent: &Agent) -> Vec<ToolSpec> {
        let mut specs = Vec::new();
        for name in &agent.mcp_services {
            match self.registry.get_service_by_name(name).await {
                Some(svc) if svc.active() && svc.kind == ServiceKind::Tool => {
                    specs.push(ToolSpec {
                        name: svc.name.clone(),
                        description: svc.description.clone(),
                        input_schema: synthesize_input_schema(&svc),
                    });
                }
                _ => {
                    let _ = self
                        .log
                        .log(LogLevel::Warning, "executor", format!("agent tool '{name}' does not resolve to an active tool"), HashMap::new(), None, None, Some(agent.id))
                        .await;
                }
            }
        }
        if agent.memory_enabled {
            specs.push(ToolSpec {
                name: MEMORY_SEARCH_TOOL.into(),
                description: "Semantically search this agent's memory".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}, "k": {"type": "integer"}},
                    "required": ["query"],
                }),
            });
            specs.push(ToolSpec {
                name: MEMORY_STORE_TOOL.into(),
                description: "Persist a fact to this agent's memory".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "content": {"type": "string"},
                        "importance": {"type": "number"},
                        "content_type": {"type": "string"},
                    },
                    "required": ["content"],
                }),
            });
            specs.push(ToolSpec {
                name: MEMORY_ANALYZE_TOOL.into(),
                description: "Summarise recent memory activity".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"window": {"type": "integer"}},
                }),
            });
        }
        specs
    }

    #[instrument(name = "executor.dispatch_tool", skip(self, agent, arguments), fields(tool = %name))]
    async fn dispatch_tool(&self, agent: &Agent, name: String, arguments: Value, execution_id: &str) -> Result<Value, UxmcpError> {
        match name.as_str() {
            MEMORY_SEARCH_TOOL => {
                let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
                let k = arguments.get("k").and_then(|v| v.as_u64()).unwrap_or(agent.memory_config.search_k as u64) as usize;
                let hits = self.memory.search(agent.id, query, k, MemoryFilters::default()).await?;
                Ok(serde_json::json!(hits
                    .into_iter()
                    .map(|h| serde_json::json!({"content": h.record.content, "score": h.score, "importance": h.record.importance}))
                    .collect::<Vec<_>>()))
            }
            MEMORY_STORE_TOOL => {
                let content = arguments.get("content").cloned().unwrap_or(Value::Null);
                let importance = arguments.get("importance").and_then(|v| v.as_f64()).map(|v| v as f32);
                let content_type = arguments
                    .get("content_type")
                    .and_then(|v| v.as_str())
                    .and_then(parse_content_type)
                    .unwrap_or(MemoryContentType::StoredKnowledge);
                let record = self
                    .memory
                    .store(agent.id, content_type, content, importance, true, None, HashMap::new(), agent.memory_config.max_memories)
                    .await?;
                Ok(serde_json::json!({"id": record.id, "importance": record.importance}))
            }
            MEMORY_ANALYZE_TOOL => {
                let stats = self.memory.stats(agent.id).await?;
                Ok(serde_json::json!({
                    "count": stats.count,
                    "average_importance": stats.average_importance,
                    "oldest": stats.oldest,
                    "newest": stats.newest,
                }))
            }
            _ => {
                let svc = self
                    .registry
                    .get_service_by_name(&name)
                    .await
                    .filter(|s| s.active() && s.kind == ServiceKind::Tool)
                    .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownService, format!("tool '{name}' is not an active service")))?;
                let params: HashMap<String, Value> = arguments.as_object().cloned().unwrap_or_default().into_iter().collect();
                tracing::info!(execution_id = %execution_id, service = %svc.name, "invoking code host");
                self.code_host
                    .execute(HandlerRequest {
                        execution_id: execution_id.to_string(),
                        code: svc.code.clone(),
                        dependencies: svc.dependencies.clone(),
                        params,
                        deadline: uxmcp_codehost::DEFAULT_DEADLINE,
                    })
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize_normal(
        &self,
        agent: &Agent,
        execution_id: &str,
        trace: &[ToolCallTrace],
        mut usage: Usage,
        iterations: u32,
        messages: &mut Vec<Message>,
        completion: &CompletionInterface,
        mut final_text: String,
        user_turn_text: String,
        explicit_store_happened: bool,
    ) -> Result<ExecutionResult, UxmcpError> {
        let output = if agent.output_schema.is_text() {
            Value::String(final_text.clone())
        } else {
            let schema = match &agent.output_schema {
                SchemaOrText::Schema(s) => s.clone(),
                SchemaOrText::Text(s) => serde_json::from_str(s).unwrap_or(Value::Null),
            };
            let mut attempt = 0;
            loop {
                let parsed = serde_json::from_str::<Value>(&final_text);
                let valid = parsed
                    .as_ref()
                    .ok()
                    .and_then(|v| jsonschema::validator_for(&schema).ok().map(|validator| validator.is_valid(v)))
                    .unwrap_or(false);
                if valid {
                    break parsed.unwrap();
                }
                if !agent.decision_policies.auto_correct_errors || attempt >= agent.decision_policies.max_retries {
                    return self
                        .finish_error(execution_id, trace, usage, iterations, UxmcpError::new(ErrorKind::OutputSchemaViolation, "final message does not validate against output_schema"))
                        .await;
                }
                attempt += 1;
                messages.push(Message::user(format!(
                    "Your previous reply did not match the required JSON schema. Reply again with valid JSON matching: {schema}"
                )));
                let resp = completion
                    .complete(CompletionRequest {
                        messages: messages.clone(),
                        tools: vec![],
                        mode: WireMode::Json,
                        temperature: agent.execution_policy.temperature,
                        max_tokens: agent.execution_policy.max_tokens,
                    })
                    .await?;
                usage.prompt += resp.usage.prompt;
                usage.completion += resp.usage.completion;
                usage.total += resp.usage.total;
                final_text = resp.message.unwrap_or_default();
            }
        };

        if agent.memory_enabled && !explicit_store_happened {
            let _ = self
                .memory
                .store(
                    agent.id,
                    MemoryContentType::UserMessage,
                    Value::String(user_turn_text),
                    None,
                    false,
                    None,
                    HashMap::new(),
                    agent.memory_config.max_memories,
                )
                .await;
            let _ = self
                .memory
                .store(
                    agent.id,
                    MemoryContentType::AgentResponse,
                    Value::String(final_text.clone()),
                    None,
                    false,
                    None,
                    HashMap::new(),
                    agent.memory_config.max_memories,
                )
                .await;
        }

        let result = ExecutionResult {
            execution_id: execution_id.to_string(),
            output,
            tool_calls: trace.to_vec(),
            iterations,
            usage,
            success: true,
            error: None,
        };
        self.persist_trace(&result, agent, TraceStatus::Success, None).await;
        Ok(result)
    }

    async fn finish_exhausted(&self, execution_id: &str, trace: &[ToolCallTrace], usage: Usage, iterations: u32, last_partial: Option<String>) -> Result<ExecutionResult, UxmcpError> {
        let result = ExecutionResult {
            execution_id: execution_id.to_string(),
            output: Value::String(last_partial.unwrap_or_default()),
            tool_calls: trace.to_vec(),
            iterations,
            usage,
            success: false,
            error: Some(ErrorKind::IterationsExhausted),
        };
        self.log_trace_only(&result, TraceStatus::Error, Some(ErrorKind::IterationsExhausted)).await;
        Ok(result)
    }

    async fn finish_cancelled(&self, execution_id: &str, trace: &[ToolCallTrace], usage: Usage, iterations: u32, last_partial: Option<String>) -> Result<ExecutionResult, UxmcpError> {
        let result = ExecutionResult {
            execution_id: execution_id.to_string(),
            output: Value::String(last_partial.unwrap_or_default()),
            tool_calls: trace.to_vec(),
            iterations,
            usage,
            success: false,
            error: Some(ErrorKind::Cancelled),
        };
        self.log_trace_only(&result, TraceStatus::Cancelled, Some(ErrorKind::Cancelled)).await;
        Ok(result)
    }

    async fn finish_error(&self, execution_id: &str, trace: &[ToolCallTrace], usage: Usage, iterations: u32, err: UxmcpError) -> Result<ExecutionResult, UxmcpError> {
        let result = ExecutionResult {
            execution_id: execution_id.to_string(),
            output: Value::Null,
            tool_calls: trace.to_vec(),
            iterations,
            usage,
            success: false,
            error: Some(err.kind.clone()),
        };
        self.log_trace_only(&result, TraceStatus::Error, Some(err.kind.clone())).await;
        Ok(result)
    }

    async fn persist_trace(&self, result: &ExecutionResult, agent: &Agent, status: TraceStatus, error_kind: Option<ErrorKind>) {
        let _ = self
            .log
            .log(
                LogLevel::Info,
                "executor",
                format!("execution {} finished: {:?}", result.execution_id, status),
                HashMap::from([("iterations".to_string(), serde_json::json!(result.iterations))]),
                Some(result.execution_id.clone()),
                None,
                Some(agent.id),
            )
            .await;
        let _ = error_kind;
    }

    async fn log_trace_only(&self, result: &ExecutionResult, status: TraceStatus, error_kind: Option<ErrorKind>) {
        let level = match status {
            TraceStatus::Success => LogLevel::Info,
            TraceStatus::Error => LogLevel::Error,
            TraceStatus::Cancelled => LogLevel::Warning,
        };
        let _ = self
            .log
            .log(
                level,
                "executor",
                format!("execution {} terminated: {:?}", result.execution_id, error_kind),
                HashMap::new(),
                Some(result.execution_id.clone()),
                None,
                None,
            )
            .await;
    }
}

fn bulleted(items: &[String]) -> String {
    items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
}

fn personality_directives(agent: &Agent) -> String {
    let p = &agent.personality;
    let mut parts = Vec::new();
    if let Some(tone) = &p.tone {
        parts.push(format!("tone: {tone}"));
    }
    if let Some(v) = &p.verbosity {
        parts.push(format!("verbosity: {v}"));
    }
    if let Some(e) = &p.empathy {
        parts.push(format!("empathy: {e}"));
    }
    if let Some(h) = &p.humor {
        parts.push(format!("humor: {h}"));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("Personality: {}", parts.join(", "))
    }
}

fn reasoning_preamble(agent: &Agent) -> String {
    use uxmcp_core::model::ReasoningStrategy::*;
    match agent.reasoning_strategy {
        Standard => String::new(),
        ChainOfThought => "Think step by step before answering.".to_string(),
        TreeOfThought => "Consider multiple solution paths, compare them, then commit to the best one.".to_string(),
    }
}

fn content_preview(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_content_type(s: &str) -> Option<MemoryContentType> {
    match s {
        "user_message" => Some(MemoryContentType::UserMessage),
        "agent_response" => Some(MemoryContentType::AgentResponse),
        "preference" => Some(MemoryContentType::Preference),
        "stored_knowledge" => Some(MemoryContentType::StoredKnowledge),
        "conversation" => Some(MemoryContentType::Conversation),
        "summary" => Some(MemoryContentType::Summary),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use uxmcp_core::completion::{CompletionProvider, CompletionResponse};
    use uxmcp_core::doc_store::DocStore;
    use uxmcp_core::memory::HashingEmbedder;
    use uxmcp_core::model::{ActivationState, CompletionMode as ProfileMode, HttpMethod, LlmProfile, ParamType, ServiceParam};
    use uxmcp_core::test_support::InMemoryDocStore;

    /// Replays a fixed sequence of responses, one per `complete_raw` call,
    /// repeating the last once exhausted.
    struct ScriptedProvider {
        responses: StdMutex<Vec<CompletionResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<CompletionResponse>) -> Self {
            Self { responses: StdMutex::new(responses) }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete_raw(&self, _req: &CompletionRequest) -> Result<CompletionResponse, UxmcpError> {
            let mut guard = self.responses.lock().unwrap();
            if guard.len() > 1 {
                Ok(guard.remove(0))
            } else {
                Ok(guard.last().cloned().expect("at least one scripted response"))
            }
        }
    }

    struct ScriptedFactory(Arc<ScriptedProvider>);

    impl CompletionProviderFactory for ScriptedFactory {
        fn build(&self, _profile: &uxmcp_core::model::LlmProfile) -> Result<Arc<dyn CompletionProvider>, UxmcpError> {
            Ok(self.0.clone())
        }
    }

    fn tool_response(name: &str, arguments: Value) -> CompletionResponse {
        CompletionResponse {
            message: None,
            tool_calls: vec![uxmcp_core::completion::ToolCall { id: "call-1".into(), name: name.into(), arguments }],
            usage: Usage::default(),
        }
    }

    fn final_response(text: &str) -> CompletionResponse {
        CompletionResponse { message: Some(text.into()), tool_calls: vec![], usage: Usage::default() }
    }

    fn add_service() -> uxmcp_core::model::Service {
        uxmcp_core::model::Service {
            id: uuid::Uuid::new_v4(),
            kind: ServiceKind::Tool,
            name: "add".into(),
            route: "/math/add".into(),
            method: HttpMethod::Get,
            params: vec![
                ServiceParam { name: "a".into(), param_type: ParamType::Number, required: true, description: String::new() },
                ServiceParam { name: "b".into(), param_type: ParamType::Number, required: true, description: String::new() },
            ],
            code: r#"#{"sum": params["a"] + params["b"]}"#.into(),
            dependencies: vec![],
            output_schema: None,
            input_schema: None,
            mime_type: None,
            prompt_template: None,
            prompt_args: vec![],
            llm_profile: None,
            description: "adds two numbers".into(),
            documentation: String::new(),
            state: ActivationState::Draft,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            schema_version: uxmcp_core::model::CURRENT_SCHEMA_VERSION,
        }
    }

    fn test_agent(profile_name: &str) -> Agent {
        Agent {
            id: uuid::Uuid::new_v4(),
            name: "adder-agent".into(),
            endpoint: String::new(),
            llm_profile: profile_name.into(),
            mcp_services: vec!["add".into()],
            system_prompt: "You add numbers.".into(),
            pre_prompt: String::new(),
            input_schema: SchemaOrText::Text("text".into()),
            output_schema: SchemaOrText::Text("text".into()),
            execution_policy: uxmcp_core::model::ExecutionPolicy::default(),
            identity: uxmcp_core::model::IdentityBlock::default(),
            memory_enabled: false,
            memory_config: uxmcp_core::model::MemoryConfig::default(),
            reasoning_strategy: uxmcp_core::model::ReasoningStrategy::default(),
            personality: uxmcp_core::model::PersonalityTraits::default(),
            decision_policies: uxmcp_core::model::DecisionPolicies::default(),
            state: ActivationState::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            schema_version: uxmcp_core::model::CURRENT_SCHEMA_VERSION,
        }
    }

    async fn harness(responses: Vec<CompletionResponse>) -> (AgentExecutor, Agent) {
        let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::default());
        let log = Arc::new(LogSink::new(store.clone()));
        let registry = Arc::new(Registry::bootstrap(store.clone(), log.clone()).await.unwrap());

        let profile = LlmProfile {
            id: uuid::Uuid::new_v4(),
            name: "default".into(),
            model: "test-model".into(),
            base_endpoint: None,
            api_key: "unused".into(),
            temperature: None,
            max_tokens: None,
            mode: ProfileMode::Json,
            system_prompt: None,
            active: true,
            schema_version: uxmcp_core::model::CURRENT_SCHEMA_VERSION,
        };
        registry.create_profile(profile).await.unwrap();

        let svc = registry.create_service(add_service()).await.unwrap();
        registry.activate_service(svc.id, &[]).await.unwrap();

        let code_host = Arc::new(CodeHost::new(log.clone()));
        let memory = Arc::new(MemorySubsystem::new(store.clone(), Arc::new(HashingEmbedder::default())));
        let providers: Arc<dyn CompletionProviderFactory> = Arc::new(ScriptedFactory(Arc::new(ScriptedProvider::new(responses))));
        let executor = AgentExecutor::new(registry, code_host, memory, providers, log);

        (executor, test_agent("default"))
    }

    #[tokio::test]
    async fn s2_tool_call_then_final_answer() {
        let (executor, agent) = harness(vec![tool_response("add", serde_json::json!({"a": 2, "b": 3})), final_response("the sum is 5")]).await;

        let result = executor.execute(&agent, Value::String("what is 2 + 3?".into()), ExecutionOptions::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output, Value::String("the sum is 5".into()));
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].result["sum"], 5);
    }

    #[tokio::test]
    async fn s3_iteration_budget_is_exhausted() {
        // A single scripted response that `ScriptedProvider` replays forever:
        // the model never stops calling the tool.
        let (executor, mut agent) = harness(vec![tool_response("add", serde_json::json!({"a": 1, "b": 1}))]).await;
        agent.execution_policy.max_iterations = 2;

        let result = executor.execute(&agent, Value::String("loop forever".into()), ExecutionOptions::default()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::IterationsExhausted));
        assert_eq!(result.iterations, 2);
    }
}
