pub mod agents;
pub mod dynamic;
pub mod llms;
pub mod logs;
pub mod mcp;
pub mod memory;
pub mod meta_agent;
pub mod services;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// The full HTTP surface of spec §6. Everything that isn't a reserved
/// prefix below falls through to [`dynamic::dispatch`], which resolves the
/// path against the registry's active service routes.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/services", get(services::list).post(services::create))
        .route("/services/generate", post(meta_agent::generate_service))
        .route("/services/:id", get(services::get).put(services::update).delete(services::delete))
        .route("/services/:id/activate", post(services::activate))
        .route("/services/:id/deactivate", post(services::deactivate))
        .route("/services/:id/test", post(services::test))
        .route("/agents", get(agents::list).post(agents::create))
        .route("/agents/:id", get(agents::get).put(agents::update).delete(agents::delete))
        .route("/agents/:id/activate", post(agents::activate))
        .route("/agents/:id/deactivate", post(agents::deactivate))
        .route("/agents/:id/validate", post(agents::validate))
        .route("/agents/:id/execute", post(agents::execute))
        .route("/agents/:id/memory", get(memory::list).post(memory::store).delete(memory::delete))
        .route("/agents/:id/memory/search", post(memory::search))
        .route("/agents/:id/memory/stats", get(memory::stats))
        .route("/llms", get(llms::list).post(llms::create))
        .route("/llms/:id", get(llms::get).put(llms::update).delete(llms::delete))
        .route("/meta-agent/create", post(meta_agent::create_agent))
        .route("/agent/create-service", post(meta_agent::create_service))
        .route("/logs", get(logs::list).delete(logs::delete))
        .route("/mcp", get(mcp::catalogue))
        .route("/mcp/server-info", get(mcp::server_info))
        .fallback(dynamic::dispatch)
        .with_state(state)
}
