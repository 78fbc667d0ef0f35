use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use uxmcp_core::mcp_surface::McpCatalogue;

use crate::state::AppState;

/// `/mcp` (spec §6): the MCP protocol surface. A real MCP client speaks a
/// richer JSON-RPC handshake over this; the catalogue is the payload that
/// handshake ultimately serves (spec §4.3).
pub async fn catalogue(State(state): State<Arc<AppState>>) -> Json<McpCatalogue> {
    Json(state.mcp.catalogue(&state.registry).await)
}

pub async fn server_info(State(state): State<Arc<AppState>>) -> Json<uxmcp_core::mcp_surface::McpServerInfo> {
    Json(state.mcp.server_info(&state.registry).await)
}
