//! Read-only derived view over the registry's active services, grouped by
//! kind, in the canonical MCP shape (spec §4.3).

use crate::model::{ParamType, Service, ServiceKind};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResource {
    pub name: String,
    pub description: String,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    pub description: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpCatalogue {
    pub tools: Vec<McpTool>,
    pub resources: Vec<McpResource>,
    pub prompts: Vec<McpPrompt>,
}

/// Connection metadata handed to external MCP clients (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerInfo {
    pub server_url: String,
    pub protocol_version: &'static str,
    pub tool_count: usize,
    pub resource_count: usize,
    pub prompt_count: usize,
}

/// Synthesises a JSON-schema `object` from a service's declared params when
/// no explicit `input_schema` is present (spec §4.3).
pub fn synthesize_input_schema(svc: &Service) -> serde_json::Value {
    if let Some(schema) = &svc.input_schema {
        return schema.clone();
    }
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for p in &svc.params {
        properties.insert(
            p.name.clone(),
            serde_json::json!({
                "type": json_schema_type(p.param_type),
                "description": p.description,
            }),
        );
        if p.required {
            required.push(serde_json::Value::String(p.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn json_schema_type(t: ParamType) -> &'static str {
    match t {
        ParamType::String => "string",
        ParamType::Number => "number",
        ParamType::Boolean => "boolean",
        ParamType::Object => "object",
        ParamType::Array => "array",
    }
}

/// Lazily recomputed from the registry on every call; never cached (spec §4.3).
pub struct McpSurface {
    server_url: String,
}

impl McpSurface {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self { server_url: server_url.into() }
    }

    pub async fn catalogue(&self, registry: &Registry) -> McpCatalogue {
        let mut active: Vec<Service> = registry.list_services().await.into_iter().filter(|s| s.active()).collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));

        let mut catalogue = McpCatalogue::default();
        for svc in active {
            match svc.kind {
                ServiceKind::Tool => catalogue.tools.push(McpTool {
                    name: svc.name.clone(),
                    description: svc.description.clone(),
                    input_schema: synthesize_input_schema(&svc),
                    output_schema: svc.output_schema.clone(),
                }),
                ServiceKind::Resource => catalogue.resources.push(McpResource {
                    name: svc.name.clone(),
                    description: svc.description.clone(),
                    route: svc.route.clone(),
                    mime_type: svc.mime_type.clone(),
                }),
                ServiceKind::Prompt => catalogue.prompts.push(McpPrompt {
                    name: svc.name.clone(),
                    description: svc.description.clone(),
                    arguments: svc.prompt_args.clone(),
                }),
            }
        }
        catalogue
    }

    pub async fn server_info(&self, registry: &Registry) -> McpServerInfo {
        let catalogue = self.catalogue(registry).await;
        McpServerInfo {
            server_url: self.server_url.clone(),
            protocol_version: "2024-11-05",
            tool_count: catalogue.tools.len(),
            resource_count: catalogue.resources.len(),
            prompt_count: catalogue.prompts.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_store::DocStore;
    use crate::log_sink::LogSink;
    use crate::model::{ActivationState, HttpMethod, ServiceParam};
    use crate::test_support::InMemoryDocStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn tool(name: &str) -> Service {
        Service {
            id: uuid::Uuid::new_v4(),
            kind: ServiceKind::Tool,
            name: name.to_string(),
            route: format!("/{name}"),
            method: HttpMethod::Get,
            params: vec![ServiceParam {
                name: "q".into(),
                param_type: ParamType::String,
                required: true,
                description: "query".into(),
            }],
            code: "return {};".into(),
            dependencies: vec![],
            output_schema: None,
            input_schema: None,
            mime_type: None,
            prompt_template: None,
            prompt_args: vec![],
            llm_profile: None,
            description: format!("does {name}"),
            documentation: String::new(),
            state: ActivationState::Draft,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            schema_version: crate::model::CURRENT_SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn catalogue_only_includes_active_sorted_by_name() {
        let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::default());
        let log = Arc::new(LogSink::new(store.clone()));
        let registry = Registry::bootstrap(store, log).await.unwrap();

        let zeta = registry.create_service(tool("zeta")).await.unwrap();
        let alpha = registry.create_service(tool("alpha")).await.unwrap();
        registry.create_service(tool("never_activated")).await.unwrap();
        registry.activate_service(zeta.id, &[]).await.unwrap();
        registry.activate_service(alpha.id, &[]).await.unwrap();

        let surface = McpSurface::new("http://localhost:8080/mcp");
        let catalogue = surface.catalogue(&registry).await;
        let names: Vec<&str> = catalogue.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn synthesizes_schema_from_params() {
        let svc = tool("search");
        let schema = synthesize_input_schema(&svc);
        assert_eq!(schema["properties"]["q"]["type"], "string");
        assert_eq!(schema["required"][0], "q");
    }
}
