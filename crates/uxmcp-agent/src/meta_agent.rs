//! Requirement analysis → tool synthesis → agent assembly pipeline (spec
//! §4.5), streamed to callers as [`ProgressEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use uxmcp_codehost::{CodeHost, ExecutionRequest as HandlerRequest, DEFAULT_DEADLINE};
use uxmcp_core::completion::{CompletionInterface, CompletionMode as WireMode, CompletionRequest, Message};
use uxmcp_core::error::{ErrorKind, UxmcpError};
use uxmcp_core::log_sink::{LogLevel, LogSink};
use uxmcp_core::model::{
    ActivationState, Agent, DecisionPolicies, ExecutionPolicy, HttpMethod, IdentityBlock, MemoryConfig,
    PersonalityTraits, ReasoningStrategy, SchemaOrText, Service, ServiceKind, ServiceParam,
};
use uxmcp_core::registry::Registry;

use crate::executor::ExecutionOptions;
use crate::providers::CompletionProviderFactory;
use crate::AgentExecutor;

/// The `{"step": ..., "message": ..., "progress"?, "details"?}` shape used
/// for SSE events (spec §6, §4.5).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressEvent {
    pub step: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ProgressEvent {
    fn new(step: &str, message: impl Into<String>) -> Self {
        Self { step: step.to_string(), message: message.into(), progress: None, details: None }
    }

    fn with_details(step: &str, message: impl Into<String>, details: Value) -> Self {
        Self { step: step.to_string(), message: message.into(), progress: None, details: Some(details) }
    }
}

pub struct MetaAgentOptions {
    pub llm_profile: String,
    pub max_tools_to_create: usize,
    pub max_retries: u32,
    pub smoke_test: bool,
}

impl Default for MetaAgentOptions {
    fn default() -> Self {
        Self { llm_profile: "default".to_string(), max_tools_to_create: 5, max_retries: 3, smoke_test: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RequirementAnalysis {
    purpose: String,
    domain: String,
    #[serde(default)]
    use_cases: Vec<String>,
    #[serde(default)]
    required_capabilities: Vec<String>,
    suggested_profile: String,
    #[serde(default)]
    complexity: String,
}

/// A single tool requirement, either produced by the requirement-identification
/// pass or supplied directly by a caller of [`MetaAgentPipeline::create_single_service`]
/// (the `/agent/create-service` and `/services/generate` entry points, which
/// skip requirement analysis and hand the pipeline an already-known tool).
#[derive(Debug, Clone, Deserialize)]
pub struct RequiredTool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub parameters: Vec<ServiceParam>,
    #[serde(default)]
    pub essential: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RequiredToolList {
    tools: Vec<RequiredTool>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolMatchDecision {
    /// Name of an existing service to bind to this requirement, if one fits.
    #[serde(default)]
    matched_service: Option<String>,
    #[serde(default)]
    create: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GeneratedService {
    route: String,
    method: HttpMethod,
    code: String,
    #[serde(default)]
    params: Vec<ServiceParam>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiagnosedPatch {
    code: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TestParams {
    params: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct TestVerdict {
    pass: bool,
    #[serde(default)]
    reason: String,
}

struct ToolOutcome {
    name: String,
    service_name: Option<String>,
    created: bool,
}

/// Drives the meta-agent state machine of spec §4.5.
pub struct MetaAgentPipeline {
    registry: Arc<Registry>,
    code_host: Arc<CodeHost>,
    providers: Arc<dyn CompletionProviderFactory>,
    executor: Arc<AgentExecutor>,
    log: Arc<LogSink>,
    allowed_dependencies: Vec<String>,
}

impl MetaAgentPipeline {
    pub fn new(
        registry: Arc<Registry>,
        code_host: Arc<CodeHost>,
        providers: Arc<dyn CompletionProviderFactory>,
        executor: Arc<AgentExecutor>,
        log: Arc<LogSink>,
        allowed_dependencies: Vec<String>,
    ) -> Self {
        Self { registry, code_host, providers, executor, log, allowed_dependencies }
    }

    /// Spawns the pipeline and returns a stream of progress events,
    /// terminating in exactly one `complete` or `error` event (spec §7).
    pub fn create(self: Arc<Self>, agent_name: String, requirement: String, options: MetaAgentOptions) -> ReceiverStream<ProgressEvent> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            self.run(agent_name, requirement, options, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn completion_for(&self, profile_name: &str) -> Result<CompletionInterface, UxmcpError> {
        let profile = self
            .registry
            .get_profile_by_name(profile_name)
            .await
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownProfile, profile_name.to_string()))?;
        Ok(CompletionInterface::new(self.providers.build(&profile)?))
    }

    async fn json_complete<T: for<'de> Deserialize<'de>>(&self, completion: &CompletionInterface, prompt: String) -> Result<T, UxmcpError> {
        let resp = completion
            .complete(CompletionRequest {
                messages: vec![Message::system("Respond with JSON only, matching the requested shape exactly."), Message::user(prompt)],
                tools: vec![],
                mode: WireMode::Json,
                temperature: None,
                max_tokens: None,
            })
            .await?;
        let text = resp.message.unwrap_or_default();
        serde_json::from_str(&text).map_err(|e| UxmcpError::new(ErrorKind::BadJson, format!("malformed structured completion: {e}")))
    }

    #[tracing::instrument(name = "meta_agent.run", skip(self, requirement, options, tx), fields(agent_name = %agent_name))]
    async fn run(&self, agent_name: String, requirement: String, options: MetaAgentOptions, tx: mpsc::Sender<ProgressEvent>) {
        if self.registry.get_agent_by_name(&agent_name).await.is_some() {
            let _ = tx
                .send(ProgressEvent::with_details(
                    "error",
                    format!("an agent named '{agent_name}' already exists"),
                    serde_json::json!({"error_kind": ErrorKind::NameConflict}),
                ))
                .await;
            return;
        }

        match self.run_inner(agent_name, requirement, options, &tx).await {
            Ok(details) => {
                tracing::info!(details = %details, "meta-agent pipeline complete");
                let _ = tx.send(ProgressEvent::with_details("complete", "meta-agent pipeline complete", details)).await;
            }
            Err(e) => {
                tracing::warn!(kind = %e.kind, detail = %e.detail, "meta-agent pipeline failed");
                let _ = tx
                    .send(ProgressEvent::with_details("error", e.detail.clone(), serde_json::json!({"error_kind": e.kind})))
                    .await;
            }
        }
    }

    async fn run_inner(
        &self,
        agent_name: String,
        requirement: String,
        options: MetaAgentOptions,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<Value, UxmcpError> {
        let completion = self.completion_for(&options.llm_profile).await?;

        tx.send(ProgressEvent::new("analyzing", "analyzing the requirement")).await.ok();
        let analysis: RequirementAnalysis = self
            .json_complete(
                &completion,
                format!(
                    "Analyse this requirement and return JSON {{purpose, domain, use_cases, required_capabilities, suggested_profile, complexity}}.\nRequirement: {requirement}"
                ),
            )
            .await?;
        tx.send(ProgressEvent::with_details("analysis_complete", "requirement analysed", serde_json::json!({"purpose": analysis.purpose, "domain": analysis.domain})))
            .await
            .ok();

        tx.send(ProgressEvent::new("identifying_tools", "identifying required tools")).await.ok();
        let required: RequiredToolList = self
            .json_complete(
                &completion,
                format!(
                    "List the minimal tools needed to satisfy this requirement, as JSON {{tools: [{{name, description, service_type, parameters, essential}}]}}.\nRequirement: {requirement}\nCapabilities: {:?}",
                    analysis.required_capabilities
                ),
            )
            .await?;
        tx.send(ProgressEvent::with_details("tools_identified", "tools identified", serde_json::json!({"tools": required.tools.iter().map(|t| &t.name).collect::<Vec<_>>()})))
            .await
            .ok();

        let mut resolved_tools = Vec::new();
        let mut failed_tools = Vec::new();
        let mut created_count = 0;

        for tool in &required.tools {
            let decision: ToolMatchDecision = self
                .json_complete(
                    &completion,
                    format!(
                        "Does an existing service satisfy this tool requirement? Return JSON {{matched_service: string|null, create: bool}}.\nTool: {} — {}\nExisting services: {:?}",
                        tool.name,
                        tool.description,
                        self.registry.list_services().await.iter().map(|s| &s.name).collect::<Vec<_>>()
                    ),
                )
                .await
                .unwrap_or(ToolMatchDecision { matched_service: None, create: true });

            if let Some(existing_name) = decision.matched_service.filter(|_| !decision.create) {
                if let Some(existing) = self.registry.get_service_by_name(&existing_name).await {
                    if !existing.active() {
                        let _ = self.registry.activate_service(existing.id, &self.allowed_dependencies).await;
                    }
                    resolved_tools.push(existing.name.clone());
                    continue;
                }
            }

            if created_count >= options.max_tools_to_create {
                failed_tools.push(tool.name.clone());
                continue;
            }
            created_count += 1;

            match self.synthesize_tool(tool, options.max_retries, &completion, tx).await {
                Ok(outcome) => {
                    if let Some(name) = outcome.service_name {
                        resolved_tools.push(name);
                    } else if tool.essential {
                        return Err(UxmcpError::new(ErrorKind::RequiredToolMissing, format!("essential tool '{}' could not be synthesised", outcome.name)));
                    } else {
                        failed_tools.push(outcome.name);
                    }
                }
                Err(e) if tool.essential => return Err(e),
                Err(_) => failed_tools.push(tool.name.clone()),
            }
        }

        tx.send(ProgressEvent::new("creating_agent", "assembling agent")).await.ok();
        let agent = Agent {
            id: Uuid::new_v4(),
            name: agent_name,
            endpoint: String::new(),
            llm_profile: analysis.suggested_profile.clone(),
            mcp_services: resolved_tools.clone(),
            system_prompt: format!("You help with: {}", analysis.purpose),
            pre_prompt: String::new(),
            input_schema: SchemaOrText::Text("text".to_string()),
            output_schema: SchemaOrText::Text("text".to_string()),
            execution_policy: ExecutionPolicy::default(),
            identity: IdentityBlock { backstory: analysis.purpose.clone(), objectives: analysis.use_cases.clone(), constraints: vec![] },
            memory_enabled: false,
            memory_config: MemoryConfig::default(),
            reasoning_strategy: ReasoningStrategy::default(),
            personality: PersonalityTraits::default(),
            decision_policies: DecisionPolicies::default(),
            state: ActivationState::Draft,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            schema_version: uxmcp_core::model::CURRENT_SCHEMA_VERSION,
        };
        let created_agent = self.registry.create_agent(agent).await?;

        tx.send(ProgressEvent::new("activating_agent", "activating agent")).await.ok();
        let active_agent = self.registry.activate_agent(created_agent.id).await?;

        let mut details = serde_json::json!({
            "agent_id": active_agent.id,
            "tools": resolved_tools,
            "failed_tools": failed_tools,
        });

        if options.smoke_test {
            tx.send(ProgressEvent::new("testing_agent", "running a smoke test")).await.ok();
            let smoke_input: TestParams = self
                .json_complete(&completion, format!("Produce a realistic test input for this agent as JSON {{params: {{input: string}}}}. Purpose: {}", analysis.purpose))
                .await
                .unwrap_or(TestParams { params: HashMap::from([("input".to_string(), Value::String(requirement.clone()))]) });
            let input_value = smoke_input.params.get("input").cloned().unwrap_or(Value::String(requirement));
            let result = self.executor.execute(&active_agent, input_value, ExecutionOptions::default()).await;
            let test_detail = match result {
                Ok(r) => serde_json::json!({"success": r.success, "output": r.output}),
                Err(e) => serde_json::json!({"success": false, "error": e.kind}),
            };
            tx.send(ProgressEvent::with_details("test_complete", "smoke test finished", test_detail.clone())).await.ok();
            details["smoke_test"] = test_detail;
        }

        Ok(details)
    }

    /// Runs the service-creation sub-loop for one required tool (spec §4.5
    /// step 4): generate, activate-or-diagnose-and-repair, then a
    /// test-invoke-or-diagnose-and-repair pass, each bounded by
    /// `max_retries` independently of the other tools in this pipeline run.
    #[tracing::instrument(name = "meta_agent.synthesize_tool", skip(self, completion, tx), fields(tool = %tool.name))]
    async fn synthesize_tool(
        &self,
        tool: &RequiredTool,
        max_retries: u32,
        completion: &CompletionInterface,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> Result<ToolOutcome, UxmcpError> {
        tx.send(ProgressEvent::with_details("creating_tool", format!("creating tool '{}'", tool.name), serde_json::json!({"name": tool.name})))
            .await
            .ok();

        let generated: GeneratedService = self
            .json_complete(
                completion,
                format!(
                    "Generate a handler for this tool as JSON {{route, method, code, params, dependencies, description}}. The code is Rhai; return JSON via a map literal `#{{...}}`; params reference `params.<name>`.\nTool: {} — {}\nDeclared parameters: {:?}\nOnly these module names may be imported: {:?}",
                    tool.name, tool.description, tool.parameters, self.allowed_dependencies
                ),
            )
            .await?;

        let mut service = Service {
            id: Uuid::new_v4(),
            kind: service_kind_from(&tool.service_type),
            name: tool.name.clone(),
            route: generated.route,
            method: generated.method,
            params: if generated.params.is_empty() { tool.parameters.clone() } else { generated.params },
            code: generated.code,
            dependencies: generated.dependencies,
            output_schema: None,
            input_schema: None,
            mime_type: None,
            prompt_template: None,
            prompt_args: vec![],
            llm_profile: None,
            description: if generated.description.is_empty() { tool.description.clone() } else { generated.description },
            documentation: String::new(),
            state: ActivationState::Draft,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            schema_version: uxmcp_core::model::CURRENT_SCHEMA_VERSION,
        };
        let created = self.registry.create_service(service.clone()).await?;
        service.id = created.id;

        let mut attempt = 0;
        loop {
            match self.registry.activate_service(service.id, &self.allowed_dependencies).await {
                Ok(_) => break,
                Err(e) => {
                    if attempt >= max_retries {
                        tx.send(ProgressEvent::with_details("tool_failed", format!("tool '{}' failed to activate: {}", tool.name, e.detail), serde_json::json!({"name": tool.name, "error_kind": e.kind})))
                            .await
                            .ok();
                        self.log_failure(&tool.name, &e).await;
                        return Ok(ToolOutcome { name: tool.name.clone(), service_name: None, created: false });
                    }
                    let patch: DiagnosedPatch = self
                        .json_complete(
                            completion,
                            format!(
                                "This handler failed to activate with error '{}'. Return a corrected version as JSON {{code, dependencies}}.\nCurrent code:\n{}\nAllowed dependencies: {:?}",
                                e.detail, service.code, self.allowed_dependencies
                            ),
                        )
                        .await?;
                    service.code = patch.code;
                    service.dependencies = patch.dependencies;
                    self.registry.update_service(service.id, service.clone()).await?;
                    attempt += 1;
                }
            }
        }

        attempt = 0;
        loop {
            let test_params: TestParams = self
                .json_complete(completion, format!("Produce realistic test parameters for this tool as JSON {{params: {{...}}}}.\nTool: {} — {}\nParams: {:?}", tool.name, tool.description, service.params))
                .await
                .unwrap_or(TestParams { params: HashMap::new() });

            let invoke_result = self
                .code_host
                .execute(HandlerRequest {
                    execution_id: Uuid::new_v4().to_string(),
                    code: service.code.clone(),
                    dependencies: service.dependencies.clone(),
                    params: test_params.params,
                    deadline: DEFAULT_DEADLINE,
                })
                .await;

            let verdict = match &invoke_result {
                Ok(value) => self
                    .json_complete::<TestVerdict>(
                        completion,
                        format!("Does this tool result look correct for its description? Return JSON {{pass, reason}}.\nDescription: {}\nResult: {}", tool.description, value),
                    )
                    .await
                    .unwrap_or(TestVerdict { pass: true, reason: String::new() }),
                Err(e) => TestVerdict { pass: false, reason: e.detail.clone() },
            };

            if verdict.pass {
                break;
            }
            if attempt >= max_retries {
                tx.send(ProgressEvent::with_details("tool_failed", format!("tool '{}' failed its test: {}", tool.name, verdict.reason), serde_json::json!({"name": tool.name})))
                    .await
                    .ok();
                return Ok(ToolOutcome { name: tool.name.clone(), service_name: None, created: false });
            }
            let patch: DiagnosedPatch = self
                .json_complete(
                    completion,
                    format!("This handler's test failed: '{}'. Return a corrected version as JSON {{code, dependencies}}.\nCurrent code:\n{}", verdict.reason, service.code),
                )
                .await?;
            service.code = patch.code;
            service.dependencies = patch.dependencies;
            self.registry.deactivate_service(service.id).await?;
            self.registry.update_service(service.id, service.clone()).await?;
            self.registry.activate_service(service.id, &self.allowed_dependencies).await?;
            attempt += 1;
        }

        tx.send(ProgressEvent::with_details("tool_created", format!("tool '{}' created", tool.name), serde_json::json!({"name": tool.name})))
            .await
            .ok();
        Ok(ToolOutcome { name: tool.name.clone(), service_name: Some(service.name.clone()), created: true })
    }

    /// Entry point for `/agent/create-service` and `/services/generate`
    /// (spec §6): runs the service-creation sub-loop of step 4 in isolation,
    /// without the requirement-analysis or agent-assembly steps either side
    /// of it in [`Self::create`].
    #[tracing::instrument(name = "meta_agent.create_single_service", skip(self, tool), fields(tool = %tool.name))]
    pub fn create_single_service(self: Arc<Self>, tool: RequiredTool, profile_name: String, max_retries: u32) -> ReceiverStream<ProgressEvent> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let outcome = async {
                let completion = self.completion_for(&profile_name).await?;
                self.synthesize_tool(&tool, max_retries, &completion, &tx).await
            }
            .await;
            match outcome {
                Ok(o) => {
                    let _ = tx
                        .send(ProgressEvent::with_details(
                            "complete",
                            "service creation complete",
                            serde_json::json!({"service_name": o.service_name, "created": o.created}),
                        ))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(ProgressEvent::with_details("error", e.detail.clone(), serde_json::json!({"error_kind": e.kind})))
                        .await;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    async fn log_failure(&self, tool_name: &str, err: &UxmcpError) {
        let _ = self
            .log
            .log(LogLevel::Warning, "meta_agent", format!("tool '{tool_name}' synthesis exhausted its retry budget: {}", err.detail), HashMap::new(), None, None, None)
            .await;
    }
}

fn service_kind_from(service_type: &str) -> ServiceKind {
    match service_type {
        "resource" => ServiceKind::Resource,
        "prompt" => ServiceKind::Prompt,
        _ => ServiceKind::Tool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use futures::StreamExt;
    use uxmcp_core::completion::{CompletionProvider, CompletionResponse, Usage};
    use uxmcp_core::doc_store::DocStore;
    use uxmcp_core::memory::{HashingEmbedder, MemorySubsystem};
    use uxmcp_core::model::{CompletionMode as ProfileMode, LlmProfile};
    use uxmcp_core::test_support::InMemoryDocStore;

    /// Replays a fixed queue of raw JSON response bodies, one per
    /// `complete_raw` call, in the exact order the pipeline issues them.
    struct JsonQueueProvider {
        queue: StdMutex<VecDeque<String>>,
    }

    impl JsonQueueProvider {
        fn new(bodies: Vec<&str>) -> Self {
            Self { queue: StdMutex::new(bodies.into_iter().map(String::from).collect()) }
        }
    }

    #[async_trait]
    impl CompletionProvider for JsonQueueProvider {
        async fn complete_raw(&self, _req: &CompletionRequest) -> Result<CompletionResponse, UxmcpError> {
            let body = self.queue.lock().unwrap().pop_front().expect("scripted response queue exhausted");
            Ok(CompletionResponse { message: Some(body), tool_calls: vec![], usage: Usage::default() })
        }
    }

    struct QueueFactory(Arc<JsonQueueProvider>);

    impl CompletionProviderFactory for QueueFactory {
        fn build(&self, _profile: &uxmcp_core::model::LlmProfile) -> Result<Arc<dyn CompletionProvider>, UxmcpError> {
            Ok(self.0.clone())
        }
    }

    async fn harness(bodies: Vec<&str>) -> Arc<MetaAgentPipeline> {
        let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::default());
        let log = Arc::new(LogSink::new(store.clone()));
        let registry = Arc::new(Registry::bootstrap(store.clone(), log.clone()).await.unwrap());

        registry
            .create_profile(LlmProfile {
                id: Uuid::new_v4(),
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
            })
            .await
            .unwrap();

        let code_host = Arc::new(CodeHost::new(log.clone()));
        let memory = Arc::new(MemorySubsystem::new(store.clone(), Arc::new(HashingEmbedder::default())));
        let providers: Arc<dyn CompletionProviderFactory> = Arc::new(QueueFactory(Arc::new(JsonQueueProvider::new(bodies))));
        let executor = Arc::new(AgentExecutor::new(registry.clone(), code_host.clone(), memory, providers.clone(), log.clone()));

        Arc::new(MetaAgentPipeline::new(registry, code_host, providers, executor, log, vec![]))
    }

    async fn drain(mut stream: ReceiverStream<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn s4_meta_agent_happy_path() {
        let pipeline = harness(vec![
            r#"{"purpose":"answer weather questions","domain":"weather","use_cases":[],"required_capabilities":["weather_lookup"],"suggested_profile":"default","complexity":"low"}"#,
            r#"{"tools":[{"name":"weather_lookup","description":"look up the weather for a city","service_type":"tool","parameters":[{"name":"city","type":"string","required":true,"description":"city name"}],"essential":true}]}"#,
            r#"{"matched_service": null, "create": true}"#,
            r#"{"route":"/weather/lookup","method":"GET","code":"#{\"city\": params[\"city\"]}","params":[],"dependencies":[],"description":"looks up a city's weather"}"#,
            r#"{"params": {"city": "Paris"}}"#,
            r#"{"pass": true, "reason": ""}"#,
        ])
        .await;

        let events = drain(pipeline.create("weather-agent".to_string(), "build an agent that answers weather questions".to_string(), MetaAgentOptions::default())).await;

        let last = events.last().expect("at least one event");
        assert_eq!(last.step, "complete");
        let details = last.details.clone().expect("complete event carries details");
        assert_eq!(details["tools"], serde_json::json!(["weather_lookup"]));
        assert_eq!(details["failed_tools"], serde_json::json!([]));
        assert!(events.iter().any(|e| e.step == "tool_created"));
    }

    #[tokio::test]
    async fn s5_meta_agent_repairs_an_undeclared_dependency() {
        let pipeline = harness(vec![
            // first generation imports a module that isn't declared; activation
            // itself only checks the declared `dependencies` list (empty here),
            // so this only fails once the test-invoke loop actually runs it
            r#"{"route":"/net/ping","method":"GET","code":"import \"networking\" as net; #{\"ok\": true}","params":[],"dependencies":[],"description":"pings a host"}"#,
            r#"{"params": {}}"#,
            // diagnosed patch drops the bad import after the first test invoke fails
            r#"{"code":"#{\"ok\": true}","dependencies":[]}"#,
            r#"{"params": {}}"#,
            r#"{"pass": true, "reason": ""}"#,
        ])
        .await;

        let tool = RequiredTool { name: "pinger".into(), description: "pings a host".into(), service_type: "tool".into(), parameters: vec![], essential: true };
        let events = drain(pipeline.create_single_service(tool, "default".to_string(), 3)).await;

        let last = events.last().expect("at least one event");
        assert_eq!(last.step, "complete");
        assert!(events.iter().any(|e| e.step == "tool_created"));
        assert!(!events.iter().any(|e| e.step == "tool_failed"));
    }
}
