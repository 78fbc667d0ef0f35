//! Generic `/{service.route}` dispatcher (spec §6, §4.1 "Route mount").
//! Installed as the axum fallback; every active service's route is resolved
//! here rather than mounted as an individual axum route, since services
//! activate and deactivate at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use uxmcp_codehost::{ExecutionRequest as HandlerRequest, DEFAULT_DEADLINE};
use uxmcp_core::model::{HttpMethod, ParamType};

use crate::state::AppState;

fn to_model_method(m: &Method) -> Option<HttpMethod> {
    match m.as_str() {
        "GET" => Some(HttpMethod::Get),
        "POST" => Some(HttpMethod::Post),
        "PUT" => Some(HttpMethod::Put),
        "PATCH" => Some(HttpMethod::Patch),
        "DELETE" => Some(HttpMethod::Delete),
        _ => None,
    }
}

fn coerce(raw: &str, ty: ParamType) -> Value {
    match ty {
        ParamType::Number => serde_json::from_str::<f64>(raw).map(Value::from).unwrap_or_else(|_| Value::String(raw.to_string())),
        ParamType::Boolean => raw.parse::<bool>().map(Value::Bool).unwrap_or_else(|_| Value::String(raw.to_string())),
        ParamType::Object | ParamType::Array => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        ParamType::String => Value::String(raw.to_string()),
    }
}

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(model_method) = to_model_method(&method) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };

    let Some((svc, path_params)) = state.registry.resolve_route(model_method, uri.path()).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let body_object: HashMap<String, Value> = if body.is_empty() {
        HashMap::new()
    } else {
        serde_json::from_slice::<Value>(&body).ok().and_then(|v| v.as_object().cloned()).map(|m| m.into_iter().collect()).unwrap_or_default()
    };

    let mut params: HashMap<String, Value> = HashMap::new();
    for p in &svc.params {
        if let Some(raw) = path_params.get(&p.name).or_else(|| query.get(&p.name)) {
            params.insert(p.name.clone(), coerce(raw, p.param_type));
        } else if let Some(v) = body_object.get(&p.name) {
            params.insert(p.name.clone(), v.clone());
        }
    }

    let result = state
        .code_host
        .execute(HandlerRequest {
            execution_id: Uuid::new_v4().to_string(),
            code: svc.code,
            dependencies: svc.dependencies,
            params,
            deadline: DEFAULT_DEADLINE,
        })
        .await;

    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(e.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(e)).into_response()
        }
    }
}
