//! Sandboxed invocation of user-supplied handler code (spec §4.2).
//!
//! Handlers are small Rhai scripts evaluated against a `params` object
//! built from the declared parameter list. Each invocation runs on the
//! bounded worker pool, inside a deadline enforced by a cooperative
//! progress check, with only declared dependencies resolvable as Rhai
//! modules.

use rhai::{Dynamic, Engine, EvalAltResult, Map, Module, ModuleResolver, Scope};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uxmcp_core::error::{ErrorKind, UxmcpError};
use uxmcp_core::log_sink::{LogLevel, LogSink};

/// Deadline applied when a service does not override it (spec §4.2).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
/// Cap on the JSON-serialized size of a handler's result (spec §4.2).
pub const DEFAULT_MAX_RESULT_BYTES: usize = 1_000_000;

/// Resolves `import` statements against a fixed allow-list; anything else
/// is rejected so undeclared dependencies surface as a typed error instead
/// of reaching into the filesystem (spec §4.2 "dependency isolation").
struct AllowListResolver {
    allowed: Vec<String>,
}

impl ModuleResolver for AllowListResolver {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: rhai::Position,
    ) -> Result<Arc<Module>, Box<EvalAltResult>> {
        if self.allowed.iter().any(|a| a == path) {
            // Declared dependencies are host-provided capabilities wired in
            // by the deployment; the sandbox itself only vouches that the
            // name was declared, not that it resolves to real I/O.
            Ok(Arc::new(Module::new()))
        } else {
            Err(Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos)))
        }
    }
}

/// Request passed to [`CodeHost::execute`].
pub struct ExecutionRequest {
    pub execution_id: String,
    pub code: String,
    pub dependencies: Vec<String>,
    pub params: HashMap<String, Value>,
    pub deadline: Duration,
}

fn json_to_dynamic(v: &Value) -> Dynamic {
    rhai::serde::to_dynamic(v).unwrap_or(Dynamic::UNIT)
}

fn dynamic_to_json(d: Dynamic) -> Result<Value, UxmcpError> {
    rhai::serde::from_dynamic(&d).map_err(|e| UxmcpError::new(ErrorKind::BadResult, e.to_string()))
}

fn classify_eval_error(err: &EvalAltResult, timed_out: &AtomicBool) -> UxmcpError {
    if timed_out.load(Ordering::SeqCst) {
        return UxmcpError::new(ErrorKind::Timeout, "handler exceeded its deadline");
    }
    match err {
        EvalAltResult::ErrorModuleNotFound(name, _) => {
            UxmcpError::with_field(ErrorKind::UndeclaredDependency, "dependencies", format!("undeclared module '{name}'"))
        }
        other => UxmcpError::new(ErrorKind::BadResult, other.to_string()),
    }
}

/// Runs handlers on a bounded worker pool (default size = 2 * CPU count,
/// spec §5) and enforces the Code Host's deadline/isolation/size contracts.
pub struct CodeHost {
    permits: Arc<tokio::sync::Semaphore>,
    max_result_bytes: usize,
    log: Arc<LogSink>,
}

impl CodeHost {
    pub fn new(log: Arc<LogSink>) -> Self {
        Self::with_capacity(log, 2 * num_cpus::get(), DEFAULT_MAX_RESULT_BYTES)
    }

    pub fn with_capacity(log: Arc<LogSink>, workers: usize, max_result_bytes: usize) -> Self {
        Self {
            permits: Arc::new(tokio::sync::Semaphore::new(workers.max(1))),
            max_result_bytes,
            log,
        }
    }

    pub async fn execute(&self, req: ExecutionRequest) -> Result<Value, UxmcpError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| UxmcpError::bug("code host semaphore closed"))?;

        let max_result_bytes = self.max_result_bytes;
        let execution_id = req.execution_id.clone();
        let result = tokio::task::spawn_blocking(move || run_handler(req, max_result_bytes))
            .await
            .map_err(|e| UxmcpError::bug(format!("code host worker panicked: {e}")))?;

        match &result {
            Ok(_) => {
                let _ = self
                    .log
                    .log(LogLevel::Info, "codehost", "handler completed", HashMap::new(), Some(execution_id), None, None)
                    .await;
            }
            Err(e) => {
                let _ = self
                    .log
                    .log(
                        LogLevel::Error,
                        "codehost",
                        format!("handler failed: {}", e.detail),
                        HashMap::new(),
                        Some(execution_id),
                        None,
                        None,
                    )
                    .await;
            }
        }
        result
    }
}

fn run_handler(req: ExecutionRequest, max_result_bytes: usize) -> Result<Value, UxmcpError> {
    let deadline = Instant::now() + req.deadline;
    let timed_out = Arc::new(AtomicBool::new(false));

    let mut engine = Engine::new();
    engine.set_module_resolver(AllowListResolver { allowed: req.dependencies.clone() });

    let timed_out_cb = timed_out.clone();
    engine.on_progress(move |_ops| {
        if Instant::now() >= deadline {
            timed_out_cb.store(true, Ordering::SeqCst);
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    let mut params_map = Map::new();
    for (k, v) in &req.params {
        params_map.insert(k.as_str().into(), json_to_dynamic(v));
    }

    let mut scope = Scope::new();
    scope.push("params", Dynamic::from(params_map));

    let ast = engine
        .compile(&req.code)
        .map_err(|e| UxmcpError::new(ErrorKind::BadResult, format!("handler failed to compile: {e}")))?;

    let result: Dynamic = engine
        .eval_ast_with_scope(&mut scope, &ast)
        .map_err(|e| classify_eval_error(&e, &timed_out))?;

    let json = dynamic_to_json(result)?;
    let encoded = serde_json::to_vec(&json).map_err(|e| UxmcpError::new(ErrorKind::BadResult, e.to_string()))?;
    if encoded.len() > max_result_bytes {
        return Err(UxmcpError::new(
            ErrorKind::BadResult,
            format!("handler result of {} bytes exceeds the {}-byte cap", encoded.len(), max_result_bytes),
        ));
    }
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uxmcp_core::doc_store::DocStore;

    #[derive(Default)]
    struct NullStore;

    #[async_trait::async_trait]
    impl DocStore for NullStore {
        async fn put_service(&self, _: &uxmcp_core::model::Service) -> Result<(), UxmcpError> { Ok(()) }
        async fn get_service(&self, _: uuid::Uuid) -> Result<Option<uxmcp_core::model::Service>, UxmcpError> { Ok(None) }
        async fn get_service_by_name(&self, _: &str) -> Result<Option<uxmcp_core::model::Service>, UxmcpError> { Ok(None) }
        async fn list_services(&self) -> Result<Vec<uxmcp_core::model::Service>, UxmcpError> { Ok(vec![]) }
        async fn delete_service(&self, _: uuid::Uuid) -> Result<(), UxmcpError> { Ok(()) }
        async fn put_agent(&self, _: &uxmcp_core::model::Agent) -> Result<(), UxmcpError> { Ok(()) }
        async fn get_agent(&self, _: uuid::Uuid) -> Result<Option<uxmcp_core::model::Agent>, UxmcpError> { Ok(None) }
        async fn get_agent_by_name(&self, _: &str) -> Result<Option<uxmcp_core::model::Agent>, UxmcpError> { Ok(None) }
        async fn list_agents(&self) -> Result<Vec<uxmcp_core::model::Agent>, UxmcpError> { Ok(vec![]) }
        async fn delete_agent(&self, _: uuid::Uuid) -> Result<(), UxmcpError> { Ok(()) }
        async fn put_profile(&self, _: &uxmcp_core::model::LlmProfile) -> Result<(), UxmcpError> { Ok(()) }
        async fn get_profile(&self, _: uuid::Uuid) -> Result<Option<uxmcp_core::model::LlmProfile>, UxmcpError> { Ok(None) }
        async fn get_profile_by_name(&self, _: &str) -> Result<Option<uxmcp_core::model::LlmProfile>, UxmcpError> { Ok(None) }
        async fn list_profiles(&self) -> Result<Vec<uxmcp_core::model::LlmProfile>, UxmcpError> { Ok(vec![]) }
        async fn delete_profile(&self, _: uuid::Uuid) -> Result<(), UxmcpError> { Ok(()) }
        async fn put_memory(&self, _: &uxmcp_core::model::MemoryRecord) -> Result<(), UxmcpError> { Ok(()) }
        async fn list_memories(&self, _: uuid::Uuid) -> Result<Vec<uxmcp_core::model::MemoryRecord>, UxmcpError> { Ok(vec![]) }
        async fn delete_memory(&self, _: uuid::Uuid, _: Option<uuid::Uuid>) -> Result<(), UxmcpError> { Ok(()) }
        async fn put_feedback(&self, _: &uxmcp_core::doc_store::FeedbackRecord) -> Result<(), UxmcpError> { Ok(()) }
        async fn list_feedback(&self) -> Result<Vec<uxmcp_core::doc_store::FeedbackRecord>, UxmcpError> { Ok(vec![]) }
        async fn put_demo(&self, _: &uxmcp_core::doc_store::DemoRecord) -> Result<(), UxmcpError> { Ok(()) }
        async fn list_demos(&self) -> Result<Vec<uxmcp_core::doc_store::DemoRecord>, UxmcpError> { Ok(vec![]) }
        async fn insert_log(&self, _: uxmcp_core::log_sink::LogEntry) -> Result<(), UxmcpError> { Ok(()) }
        async fn query_logs(&self, _: uxmcp_core::log_sink::LogQuery) -> Result<Vec<uxmcp_core::log_sink::LogEntry>, UxmcpError> { Ok(vec![]) }
        async fn delete_logs(&self, _: Option<uuid::Uuid>, _: chrono::DateTime<chrono::Utc>) -> Result<u64, UxmcpError> { Ok(0) }
    }

    async fn host() -> CodeHost {
        CodeHost::new(Arc::new(LogSink::new(Arc::new(NullStore))))
    }

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn s1_adds_two_numbers() {
        let host = host().await;
        let result = host
            .execute(ExecutionRequest {
                execution_id: "exec-1".into(),
                code: r#"#{"sum": params["a"] + params["b"]}"#.into(),
                dependencies: vec![],
                params: params(&[("a", Value::from(2)), ("b", Value::from(3))]),
                deadline: DEFAULT_DEADLINE,
            })
            .await
            .unwrap();
        assert_eq!(result["sum"], 5);
    }

    #[tokio::test]
    async fn undeclared_import_is_rejected() {
        let host = host().await;
        let err = host
            .execute(ExecutionRequest {
                execution_id: "exec-2".into(),
                code: r#"import "networking" as net; #{}"#.into(),
                dependencies: vec![],
                params: HashMap::new(),
                deadline: DEFAULT_DEADLINE,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndeclaredDependency);
    }

    #[tokio::test]
    async fn declared_import_is_allowed() {
        let host = host().await;
        let result = host
            .execute(ExecutionRequest {
                execution_id: "exec-3".into(),
                code: r#"import "networking" as net; #{"ok": true}"#.into(),
                dependencies: vec!["networking".into()],
                params: HashMap::new(),
                deadline: DEFAULT_DEADLINE,
            })
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn past_deadline_raises_timeout() {
        let host = host().await;
        let err = host
            .execute(ExecutionRequest {
                execution_id: "exec-4".into(),
                code: r#"let x = 0; while true { x += 1; } x"#.into(),
                dependencies: vec![],
                params: HashMap::new(),
                deadline: Duration::from_millis(1),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn oversized_result_is_rejected() {
        let host = CodeHost::with_capacity(Arc::new(LogSink::new(Arc::new(NullStore))), 1, 16);
        let err = host
            .execute(ExecutionRequest {
                execution_id: "exec-5".into(),
                code: r#"#{"s": "this string is definitely longer than sixteen bytes"}"#.into(),
                dependencies: vec![],
                params: HashMap::new(),
                deadline: DEFAULT_DEADLINE,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadResult);
    }
}
