//! `/meta-agent/create`, `/agent/create-service`, `/services/generate` (spec §6).
//! The first two stream progress over SSE; `/services/generate` is the
//! synchronous variant, draining the same stream server-side and returning
//! only the terminal event.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use uxmcp_agent::{MetaAgentOptions, ProgressEvent};
use uxmcp_core::model::ServiceParam;

use crate::state::AppState;

fn to_sse(event: ProgressEvent) -> Result<Event, Infallible> {
    Ok(Event::default().event(event.step.clone()).json_data(event).unwrap_or_else(|_| Event::default().data("serialization error")))
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub agent_name: String,
    pub requirement: String,
    #[serde(default)]
    pub llm_profile: Option<String>,
    #[serde(default)]
    pub max_tools_to_create: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub smoke_test: bool,
}

pub async fn create_agent(State(state): State<Arc<AppState>>, Json(req): Json<CreateAgentRequest>) -> impl IntoResponse {
    let mut options = MetaAgentOptions::default();
    if let Some(p) = req.llm_profile {
        options.llm_profile = p;
    }
    if let Some(m) = req.max_tools_to_create {
        options.max_tools_to_create = m;
    }
    if let Some(m) = req.max_retries {
        options.max_retries = m;
    }
    options.smoke_test = req.smoke_test;

    let stream = state.meta_agent.clone().create(req.agent_name, req.requirement, options).map(to_sse);
    sse_response(stream)
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub parameters: Vec<ServiceParam>,
    #[serde(default)]
    pub essential: bool,
    #[serde(default)]
    pub llm_profile: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn to_required_tool(req: &CreateServiceRequest) -> uxmcp_agent::meta_agent::RequiredTool {
    uxmcp_agent::meta_agent::RequiredTool {
        name: req.name.clone(),
        description: req.description.clone(),
        service_type: req.service_type.clone(),
        parameters: req.parameters.clone(),
        essential: req.essential,
    }
}

pub async fn create_service(State(state): State<Arc<AppState>>, Json(req): Json<CreateServiceRequest>) -> impl IntoResponse {
    let tool = to_required_tool(&req);
    let profile = req.llm_profile.unwrap_or_else(|| "default".to_string());
    let max_retries = req.max_retries.unwrap_or(3);

    let stream = state.meta_agent.clone().create_single_service(tool, profile, max_retries).map(to_sse);
    sse_response(stream)
}

/// Non-streaming variant: drains [`create_single_service`][uxmcp_agent::MetaAgentPipeline::create_single_service]
/// and reports only the final `complete`/`error` event as a plain JSON body.
pub async fn generate_service(State(state): State<Arc<AppState>>, Json(req): Json<CreateServiceRequest>) -> Json<Value> {
    let tool = to_required_tool(&req);
    let profile = req.llm_profile.unwrap_or_else(|| "default".to_string());
    let max_retries = req.max_retries.unwrap_or(3);

    let mut stream = state.meta_agent.clone().create_single_service(tool, profile, max_retries);
    let mut last = serde_json::json!({"step": "error", "message": "no progress emitted"});
    while let Some(event) = stream.next().await {
        last = serde_json::to_value(&event).unwrap_or(last);
    }
    Json(last)
}

fn sse_response(stream: impl Stream<Item = Result<Event, Infallible>> + Send + 'static) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(stream).keep_alive(KeepAlive::default())
}
