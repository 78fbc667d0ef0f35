//! The concrete `Completion` adapter. Wire formats for real LLM vendors are
//! explicitly out of this workspace's scope (spec §1); this is the seam a
//! deployment plugs a vendor adapter into. The shipped implementation is a
//! deterministic echo used for local smoke-testing and the test suite.

use std::sync::Arc;

use async_trait::async_trait;
use uxmcp_agent::CompletionProviderFactory;
use uxmcp_core::completion::{CompletionMode, CompletionProvider, CompletionRequest, CompletionResponse, Usage};
use uxmcp_core::error::UxmcpError;
use uxmcp_core::model::LlmProfile;

pub struct EchoProviderFactory;

impl CompletionProviderFactory for EchoProviderFactory {
    fn build(&self, _profile: &LlmProfile) -> Result<Arc<dyn CompletionProvider>, UxmcpError> {
        Ok(Arc::new(EchoProvider))
    }
}

/// Echoes the last user message back, wrapping it in `{}` when the caller
/// requested JSON mode. Good enough to exercise the executor and meta-agent
/// state machines without a network round-trip.
struct EchoProvider;

#[async_trait]
impl CompletionProvider for EchoProvider {
    async fn complete_raw(&self, req: &CompletionRequest) -> Result<CompletionResponse, UxmcpError> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, uxmcp_core::completion::MessageRole::User))
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        let message = match req.mode {
            CompletionMode::Json => Some(format!("{{\"echo\": {}}}", serde_json::to_string(&last_user).unwrap_or_default())),
            CompletionMode::Text | CompletionMode::ToolCalling => Some(last_user.clone()),
        };

        Ok(CompletionResponse {
            message,
            tool_calls: vec![],
            usage: Usage { prompt: last_user.split_whitespace().count() as u32, completion: 1, total: 1 },
        })
    }
}
