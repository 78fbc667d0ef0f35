//! Registry: owns the service/agent/profile catalogue and the dynamic route
//! table, and enforces the activation state machine (spec §4.1).

use crate::doc_store::DocStore;
use crate::error::{ErrorKind, UxmcpError};
use crate::log_sink::{LogLevel, LogSink};
use crate::model::{
    ActivationState, Agent, HttpMethod, LlmProfile, NAME_RE_SOURCE, RouteEntry, RoutePattern,
    Service, ServiceKind,
};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// A single named entry in the route table, keyed by `(method, route)`.
type RouteKey = (HttpMethod, String);

/// Owns the in-memory authoritative catalogue; the Document Store is its
/// durable mirror. Entity transitions are serialised per entity; whole
/// registry reads take the read side of the lock (spec §4.1, §5).
pub struct Registry {
    store: Arc<dyn DocStore>,
    log: Arc<LogSink>,
    services: RwLock<HashMap<uuid::Uuid, Service>>,
    agents: RwLock<HashMap<uuid::Uuid, Agent>>,
    profiles: RwLock<HashMap<uuid::Uuid, LlmProfile>>,
    routes: RwLock<HashMap<RouteKey, RouteEntry>>,
    name_re: Regex,
}

impl Registry {
    /// Builds a Registry and hydrates the in-memory catalogue and route
    /// table from the Document Store (process boot).
    pub async fn bootstrap(store: Arc<dyn DocStore>, log: Arc<LogSink>) -> Result<Self, UxmcpError> {
        let reg = Self {
            store: store.clone(),
            log,
            services: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            name_re: Regex::new(NAME_RE_SOURCE).expect("static regex"),
        };

        for svc in store.list_services().await? {
            let mounted = svc.active();
            let id = svc.id;
            let method = svc.method;
            let route = svc.route.clone();
            reg.services.write().await.insert(id, svc);
            if mounted {
                if let Some(svc) = reg.services.read().await.get(&id).cloned() {
                    let pattern = RoutePattern::compile(&route)?;
                    reg.routes.write().await.insert(
                        (method, route),
                        RouteEntry {
                            method,
                            pattern,
                            service_id: svc.id,
                            mounted_at: Utc::now(),
                        },
                    );
                }
            }
        }
        for agent in store.list_agents().await? {
            reg.agents.write().await.insert(agent.id, agent);
        }
        for profile in store.list_profiles().await? {
            reg.profiles.write().await.insert(profile.id, profile);
        }
        Ok(reg)
    }

    fn validate_name(&self, name: &str) -> Result<(), UxmcpError> {
        if !self.name_re.is_match(name) {
            return Err(UxmcpError::with_field(
                ErrorKind::ValidationFailed,
                "name",
                "name must match [A-Za-z0-9_-]+",
            ));
        }
        Ok(())
    }

    // ---- Services --------------------------------------------------

    #[instrument(name = "registry.create_service", skip(self, svc), fields(name = %svc.name))]
    pub async fn create_service(&self, mut svc: Service) -> Result<Service, UxmcpError> {
        self.validate_name(&svc.name)?;
        {
            let existing = self.services.read().await;
            if existing.values().any(|s| s.name == svc.name && s.kind == svc.kind) {
                return Err(UxmcpError::with_field(
                    ErrorKind::NameConflict,
                    "name",
                    format!("a {:?} named '{}' already exists", svc.kind, svc.name),
                ));
            }
        }
        svc.state = ActivationState::Draft;
        svc.created_at = Utc::now();
        svc.updated_at = Utc::now();
        self.store.put_service(&svc).await?;
        self.services.write().await.insert(svc.id, svc.clone());
        tracing::info!(service = %svc.name, id = %svc.id, "service created");
        Ok(svc)
    }

    pub async fn get_service(&self, id: uuid::Uuid) -> Option<Service> {
        self.services.read().await.get(&id).cloned()
    }

    pub async fn get_service_by_name(&self, name: &str) -> Option<Service> {
        self.services.read().await.values().find(|s| s.name == name).cloned()
    }

    pub async fn list_services(&self) -> Vec<Service> {
        let mut list: Vec<Service> = self.services.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    #[instrument(name = "registry.update_service", skip(self, updated), fields(service_id = %id))]
    pub async fn update_service(&self, id: uuid::Uuid, mut updated: Service) -> Result<Service, UxmcpError> {
        let mut guard = self.services.write().await;
        let existing = guard
            .get(&id)
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownService, id.to_string()))?;
        if existing.active() {
            return Err(UxmcpError::new(
                ErrorKind::ValidationFailed,
                "cannot update an active service; deactivate first",
            ));
        }
        updated.id = id;
        updated.state = existing.state;
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        self.store.put_service(&updated).await?;
        guard.insert(id, updated.clone());
        tracing::info!(service = %updated.name, id = %id, "service updated");
        Ok(updated)
    }

    /// Validates a draft service against spec §4.1's rules, without mutating
    /// state. Returns `Ok(())` or the first validation failure found.
    pub async fn validate_service(&self, svc: &Service, allowed_deps: &[String]) -> Result<(), UxmcpError> {
        let pattern = RoutePattern::compile(&svc.route)?;
        let param_names: std::collections::HashSet<&str> =
            svc.params.iter().map(|p| p.name.as_str()).collect();
        for p in pattern.param_names() {
            if !param_names.contains(p) {
                return Err(UxmcpError::with_field(
                    ErrorKind::ValidationFailed,
                    "route",
                    format!("path parameter '{{{p}}}' has no matching declared param"),
                ));
            }
        }
        for dep in &svc.dependencies {
            if !allowed_deps.iter().any(|a| a == dep) {
                return Err(UxmcpError::with_field(
                    ErrorKind::DependencyMissing,
                    "dependencies",
                    format!("dependency '{dep}' is not in the allow-list"),
                ));
            }
        }
        if svc.kind == ServiceKind::Prompt {
            if let Some(tpl) = &svc.prompt_template {
                for arg in extract_template_args(tpl) {
                    if !svc.prompt_args.iter().any(|a| a == &arg) {
                        return Err(UxmcpError::with_field(
                            ErrorKind::ValidationFailed,
                            "prompt_template",
                            format!("template references undeclared arg '{arg}'"),
                        ));
                    }
                }
            }
        }
        if let Some(schema) = &svc.output_schema {
            if !schema.is_object() {
                return Err(UxmcpError::with_field(
                    ErrorKind::ValidationFailed,
                    "output_schema",
                    "output_schema must be a JSON-schema object",
                ));
            }
        }
        Ok(())
    }

    /// Activates a draft/validated service: validates, reserves the route,
    /// flips `active`. Rolls back on failure (no orphaned routes).
    #[instrument(name = "registry.activate_service", skip(self, allowed_deps), fields(service_id = %id))]
    pub async fn activate_service(&self, id: uuid::Uuid, allowed_deps: &[String]) -> Result<Service, UxmcpError> {
        let mut services = self.services.write().await;
        let svc = services
            .get(&id)
            .cloned()
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownService, id.to_string()))?;

        self.validate_service(&svc, allowed_deps).await?;

        let pattern = RoutePattern::compile(&svc.route)?;
        let key = (svc.method, svc.route.clone());
        {
            let routes = self.routes.read().await;
            if let Some(existing) = routes.get(&key) {
                if existing.service_id != id {
                    return Err(UxmcpError::with_field(
                        ErrorKind::RouteConflict,
                        "route",
                        format!("{} {} is already bound to another active service", svc.method.as_str(), svc.route),
                    ));
                }
            }
        }

        let mut activated = svc.clone();
        activated.state = ActivationState::Active;
        activated.updated_at = Utc::now();
        self.store.put_service(&activated).await?;

        self.routes.write().await.insert(
            key,
            RouteEntry {
                method: activated.method,
                pattern,
                service_id: id,
                mounted_at: Utc::now(),
            },
        );
        services.insert(id, activated.clone());
        drop(services);

        let _ = self
            .log
            .log(
                LogLevel::Info,
                "registry",
                format!("activated service '{}' at {} {}", activated.name, activated.method.as_str(), activated.route),
                Default::default(),
                None,
                Some(id),
                None,
            )
            .await;
        tracing::info!(service = %activated.name, route = %activated.route, "service activated");
        Ok(activated)
    }

    /// Deactivates an active service: unbinds the route atomically. In-flight
    /// requests already dispatched to the handler complete normally because
    /// the route table entry is only removed, not the handler's running task.
    #[instrument(name = "registry.deactivate_service", skip(self), fields(service_id = %id))]
    pub async fn deactivate_service(&self, id: uuid::Uuid) -> Result<Service, UxmcpError> {
        let mut services = self.services.write().await;
        let svc = services
            .get(&id)
            .cloned()
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownService, id.to_string()))?;
        let key = (svc.method, svc.route.clone());
        self.routes.write().await.remove(&key);
        tracing::info!(service = %svc.name, route = %svc.route, "route unmounted");

        let mut deactivated = svc;
        deactivated.state = ActivationState::Validated;
        deactivated.updated_at = Utc::now();
        self.store.put_service(&deactivated).await?;
        services.insert(id, deactivated.clone());
        Ok(deactivated)
    }

    /// Deletion is only allowed on inactive entries (spec §3 invariant).
    #[instrument(name = "registry.delete_service", skip(self), fields(service_id = %id))]
    pub async fn delete_service(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        let mut services = self.services.write().await;
        let svc = services
            .get(&id)
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownService, id.to_string()))?;
        if svc.active() {
            return Err(UxmcpError::new(
                ErrorKind::ValidationFailed,
                "deactivate before deleting",
            ));
        }
        self.store.delete_service(id).await?;
        services.remove(&id);
        tracing::info!(id = %id, "service deleted");
        Ok(())
    }

    /// Resolves an incoming `(method, path)` to its route entry and bound
    /// path parameters, for the HTTP surface's generic dispatcher.
    pub async fn resolve_route(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Option<(Service, HashMap<String, String>)> {
        let routes = self.routes.read().await;
        for ((m, _), entry) in routes.iter() {
            if *m != method {
                continue;
            }
            if let Some(bound) = entry.pattern.matches(path) {
                let services = self.services.read().await;
                if let Some(svc) = services.get(&entry.service_id) {
                    return Some((svc.clone(), bound));
                }
            }
        }
        None
    }

    // ---- Agents ------------------------------------------------------

    #[instrument(name = "registry.create_agent", skip(self, agent), fields(name = %agent.name))]
    pub async fn create_agent(&self, mut agent: Agent) -> Result<Agent, UxmcpError> {
        self.validate_name(&agent.name)?;
        {
            let existing = self.agents.read().await;
            if existing.values().any(|a| a.name == agent.name) {
                return Err(UxmcpError::with_field(
                    ErrorKind::NameConflict,
                    "name",
                    format!("an agent named '{}' already exists", agent.name),
                ));
            }
        }
        agent.state = ActivationState::Draft;
        agent.created_at = Utc::now();
        agent.updated_at = Utc::now();
        self.store.put_agent(&agent).await?;
        self.agents.write().await.insert(agent.id, agent.clone());
        tracing::info!(agent = %agent.name, id = %agent.id, "agent created");
        Ok(agent)
    }

    pub async fn get_agent(&self, id: uuid::Uuid) -> Option<Agent> {
        self.agents.read().await.get(&id).cloned()
    }

    pub async fn get_agent_by_name(&self, name: &str) -> Option<Agent> {
        self.agents.read().await.values().find(|a| a.name == name).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let mut list: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    #[instrument(name = "registry.update_agent", skip(self, updated), fields(agent_id = %id))]
    pub async fn update_agent(&self, id: uuid::Uuid, mut updated: Agent) -> Result<Agent, UxmcpError> {
        let mut guard = self.agents.write().await;
        let existing = guard
            .get(&id)
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownAgent, id.to_string()))?;
        if existing.active() {
            return Err(UxmcpError::new(
                ErrorKind::ValidationFailed,
                "cannot update an active agent; deactivate first",
            ));
        }
        updated.id = id;
        updated.state = existing.state;
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        self.store.put_agent(&updated).await?;
        guard.insert(id, updated.clone());
        tracing::info!(agent = %updated.name, id = %id, "agent updated");
        Ok(updated)
    }

    /// Validates that every `mcp_services` name resolves in the registry
    /// (active or not — spec §3 Agent invariant), returning the missing
    /// names.
    pub async fn validate_agent_tools(&self, agent: &Agent) -> Vec<String> {
        let services = self.services.read().await;
        agent
            .mcp_services
            .iter()
            .filter(|name| !services.values().any(|s| &s.name == *name))
            .cloned()
            .collect()
    }

    #[instrument(name = "registry.activate_agent", skip(self), fields(agent_id = %id))]
    pub async fn activate_agent(&self, id: uuid::Uuid) -> Result<Agent, UxmcpError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get(&id)
            .cloned()
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownAgent, id.to_string()))?;
        drop(agents);

        let missing = self.validate_agent_tools(&agent).await;
        if !missing.is_empty() {
            return Err(UxmcpError::with_field(
                ErrorKind::ValidationFailed,
                "mcp_services",
                format!("unresolved tool names: {}", missing.join(", ")),
            ));
        }

        let mut activated = agent;
        activated.state = ActivationState::Active;
        activated.updated_at = Utc::now();
        self.store.put_agent(&activated).await?;
        self.agents.write().await.insert(id, activated.clone());
        tracing::info!(agent = %activated.name, id = %id, "agent activated");
        Ok(activated)
    }

    #[instrument(name = "registry.deactivate_agent", skip(self), fields(agent_id = %id))]
    pub async fn deactivate_agent(&self, id: uuid::Uuid) -> Result<Agent, UxmcpError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get(&id)
            .cloned()
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownAgent, id.to_string()))?;
        let mut deactivated = agent;
        deactivated.state = ActivationState::Validated;
        deactivated.updated_at = Utc::now();
        self.store.put_agent(&deactivated).await?;
        agents.insert(id, deactivated.clone());
        tracing::info!(agent = %deactivated.name, id = %id, "agent deactivated");
        Ok(deactivated)
    }

    #[instrument(name = "registry.delete_agent", skip(self), fields(agent_id = %id))]
    pub async fn delete_agent(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get(&id)
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownAgent, id.to_string()))?;
        if agent.active() {
            return Err(UxmcpError::new(
                ErrorKind::ValidationFailed,
                "deactivate before deleting",
            ));
        }
        self.store.delete_agent(id).await?;
        agents.remove(&id);
        tracing::info!(id = %id, "agent deleted");
        Ok(())
    }

    // ---- LLM profiles --------------------------------------------------

    #[instrument(name = "registry.create_profile", skip(self, profile), fields(name = %profile.name))]
    pub async fn create_profile(&self, mut profile: LlmProfile) -> Result<LlmProfile, UxmcpError> {
        self.validate_name(&profile.name)?;
        {
            let existing = self.profiles.read().await;
            if existing.values().any(|p| p.name == profile.name) {
                return Err(UxmcpError::with_field(
                    ErrorKind::NameConflict,
                    "name",
                    format!("a profile named '{}' already exists", profile.name),
                ));
            }
        }
        profile.active = false;
        self.store.put_profile(&profile).await?;
        self.profiles.write().await.insert(profile.id, profile.clone());
        tracing::info!(profile = %profile.name, id = %profile.id, "profile created");
        Ok(profile)
    }

    pub async fn get_profile(&self, id: uuid::Uuid) -> Option<LlmProfile> {
        self.profiles.read().await.get(&id).cloned()
    }

    pub async fn get_profile_by_name(&self, name: &str) -> Option<LlmProfile> {
        self.profiles.read().await.values().find(|p| p.name == name).cloned()
    }

    pub async fn list_profiles(&self) -> Vec<LlmProfile> {
        let mut list: Vec<LlmProfile> = self.profiles.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Full-record update, including `active` — profiles have no separate
    /// activate/deactivate endpoint (spec §6), so this is the only path that
    /// can flip a profile live.
    #[instrument(name = "registry.update_profile", skip(self, updated), fields(profile_id = %id))]
    pub async fn update_profile(&self, id: uuid::Uuid, mut updated: LlmProfile) -> Result<LlmProfile, UxmcpError> {
        let mut guard = self.profiles.write().await;
        guard
            .get(&id)
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownProfile, id.to_string()))?;
        updated.id = id;
        self.store.put_profile(&updated).await?;
        guard.insert(id, updated.clone());
        tracing::info!(profile = %updated.name, id = %id, active = updated.active, "profile updated");
        Ok(updated)
    }

    #[instrument(name = "registry.delete_profile", skip(self), fields(profile_id = %id))]
    pub async fn delete_profile(&self, id: uuid::Uuid) -> Result<(), UxmcpError> {
        self.profiles
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| UxmcpError::new(ErrorKind::UnknownProfile, id.to_string()))?;
        self.store.delete_profile(id).await?;
        tracing::info!(id = %id, "profile deleted");
        Ok(())
    }
}

fn extract_template_args(template: &str) -> Vec<String> {
    // `{{arg}}` placeholders, mirroring the `{{name}}` convention used
    // elsewhere in this workspace's prompt-chaining code.
    let re = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("static regex");
    re.captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryDocStore;
    use crate::model::{ActivationState, HttpMethod, ParamType, ServiceKind, ServiceParam};

    fn draft_service(name: &str, route: &str) -> Service {
        Service {
            id: uuid::Uuid::new_v4(),
            kind: ServiceKind::Tool,
            name: name.to_string(),
            route: route.to_string(),
            method: HttpMethod::Get,
            params: vec![
                ServiceParam { name: "a".into(), param_type: ParamType::Number, required: true, description: String::new() },
                ServiceParam { name: "b".into(), param_type: ParamType::Number, required: true, description: String::new() },
            ],
            code: "return {\"sum\": params.a + params.b};".to_string(),
            dependencies: vec![],
            output_schema: None,
            input_schema: None,
            mime_type: None,
            prompt_template: None,
            prompt_args: vec![],
            llm_profile: None,
            description: "adds two numbers".to_string(),
            documentation: String::new(),
            state: ActivationState::Draft,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            schema_version: crate::model::CURRENT_SCHEMA_VERSION,
        }
    }

    async fn registry() -> Registry {
        let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::default());
        let log = Arc::new(LogSink::new(store.clone()));
        Registry::bootstrap(store, log).await.unwrap()
    }

    #[tokio::test]
    async fn s1_service_lifecycle_route_conflict_and_404() {
        let reg = registry().await;
        let add = reg.create_service(draft_service("add", "/math/add")).await.unwrap();
        let active = reg.activate_service(add.id, &[]).await.unwrap();
        assert!(active.active());

        let second = reg.create_service(draft_service("add2", "/math/add")).await.unwrap();
        let err = reg.activate_service(second.id, &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RouteConflict);

        let resolved = reg.resolve_route(HttpMethod::Get, "/math/add").await;
        assert!(resolved.is_some());

        reg.deactivate_service(add.id).await.unwrap();
        let resolved = reg.resolve_route(HttpMethod::Get, "/math/add").await;
        assert!(resolved.is_none());

        reg.delete_service(add.id).await.unwrap();
        assert!(reg.get_service(add.id).await.is_none());
    }

    #[tokio::test]
    async fn create_then_delete_draft_is_a_no_op() {
        let reg = registry().await;
        let svc = reg.create_service(draft_service("noop", "/noop")).await.unwrap();
        reg.delete_service(svc.id).await.unwrap();
        assert!(reg.get_service(svc.id).await.is_none());
        assert!(reg.resolve_route(HttpMethod::Get, "/noop").await.is_none());
    }

    #[tokio::test]
    async fn route_param_must_be_declared() {
        let reg = registry().await;
        let mut svc = draft_service("bad", "/x/{missing}");
        svc.params.clear();
        let created = reg.create_service(svc).await.unwrap();
        let err = reg.activate_service(created.id, &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }
}
