use std::sync::Arc;

use uxmcp_agent::{AgentExecutor, MetaAgentPipeline};
use uxmcp_codehost::CodeHost;
use uxmcp_core::log_sink::LogSink;
use uxmcp_core::mcp_surface::McpSurface;
use uxmcp_core::memory::MemorySubsystem;
use uxmcp_core::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub code_host: Arc<CodeHost>,
    pub memory: Arc<MemorySubsystem>,
    pub executor: Arc<AgentExecutor>,
    pub meta_agent: Arc<MetaAgentPipeline>,
    pub mcp: Arc<McpSurface>,
    pub log: Arc<LogSink>,
    pub allowed_dependencies: Vec<String>,
}
