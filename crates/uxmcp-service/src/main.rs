mod error;
mod providers;
mod routes;
mod state;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use uxmcp_agent::{AgentExecutor, MetaAgentPipeline};
use uxmcp_codehost::CodeHost;
use uxmcp_core::doc_store::MongoDocStore;
use uxmcp_core::log_sink::LogSink;
use uxmcp_core::mcp_surface::McpSurface;
use uxmcp_core::memory::{HashingEmbedder, MemorySubsystem};
use uxmcp_core::registry::Registry;

use crate::providers::EchoProviderFactory;
use crate::state::AppState;

/// UXMCP service: dynamic service registry, MCP surface and agent runtime (spec §6).
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,
    /// MongoDB connection string for the document store
    #[arg(long, env = "MONGODB_URL", default_value = "mongodb://localhost:27017")]
    mongodb_url: String,
    /// Database name within the MongoDB instance
    #[arg(long, env = "DATABASE_NAME", default_value = "uxmcp")]
    database_name: String,
    /// Public URL this server is reachable at, advertised in the MCP server-info payload
    #[arg(long, env = "MCP_SERVER_URL", default_value = "http://localhost:8080")]
    mcp_server_url: String,
    /// Comma-separated module names the Code Host sandbox may import
    #[arg(long, env = "ALLOWED_DEPENDENCIES", value_delimiter = ',', default_value = "http,json,time")]
    allowed_dependencies: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uxmcp_service=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();

    info!(addr = %args.addr, database = %args.database_name, "starting uxmcp service");

    let store = match MongoDocStore::connect(&args.mongodb_url, &args.database_name).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e.detail, "document store unreachable");
            return ExitCode::from(2);
        }
    };

    let log = Arc::new(LogSink::new(store.clone()));

    let registry = match Registry::bootstrap(store.clone(), log.clone()).await {
        Ok(reg) => Arc::new(reg),
        Err(e) => {
            error!(error = %e.detail, "failed to bootstrap registry");
            return ExitCode::from(1);
        }
    };

    let code_host = Arc::new(CodeHost::new(log.clone()));
    let memory = Arc::new(MemorySubsystem::new(store.clone(), Arc::new(HashingEmbedder::default())));
    let providers = Arc::new(EchoProviderFactory);
    let executor = Arc::new(AgentExecutor::new(registry.clone(), code_host.clone(), memory.clone(), providers.clone(), log.clone()));
    let meta_agent = Arc::new(MetaAgentPipeline::new(
        registry.clone(),
        code_host.clone(),
        providers.clone(),
        executor.clone(),
        log.clone(),
        args.allowed_dependencies.clone(),
    ));
    let mcp = Arc::new(McpSurface::new(args.mcp_server_url.clone()));

    let state = Arc::new(AppState { registry, code_host, memory, executor, meta_agent, mcp, log, allowed_dependencies: args.allowed_dependencies });

    let app = routes::build(state).layer(CorsLayer::permissive());

    let listener = match tokio::net::TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %args.addr, "failed to bind address");
            return ExitCode::from(1);
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining in-flight requests");
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(error = %e, "server exited with error");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
