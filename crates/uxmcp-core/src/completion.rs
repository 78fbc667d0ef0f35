//! Provider-agnostic LLM boundary (spec §4.7). Concrete providers (OpenAI,
//! Anthropic, local) implement [`CompletionProvider`]; the Agent Executor
//! and Meta-Agent Pipeline only ever see this trait.

use crate::error::{ErrorKind, UxmcpError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    Text,
    Json,
    ToolCalling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: Some(content.into()), tool_call_id: None, tool_calls: vec![] }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: Some(content.into()), tool_call_id: None, tool_calls: vec![] }
    }
    pub fn tool_response(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: vec![],
        }
    }
}

/// A tool offered to the provider in tool-calling mode; `input_schema` is
/// the JSON-schema describing its parameters (spec §4.4 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub mode: CompletionMode,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// Retry policy for `ProviderRateLimited`/`ProviderUnavailable` (spec §7):
/// base 500ms, factor 2, cap 8s, at most 3 attempts.
pub const RETRY_BASE_MS: u64 = 500;
pub const RETRY_FACTOR: u32 = 2;
pub const RETRY_CAP_MS: u64 = 8_000;
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

pub fn retry_delay_ms(attempt: u32) -> u64 {
    let scaled = RETRY_BASE_MS.saturating_mul(RETRY_FACTOR.saturating_pow(attempt) as u64);
    scaled.min(RETRY_CAP_MS)
}

#[async_trait]
pub trait CompletionProvider: Send + Sync + 'static {
    async fn complete_raw(&self, req: &CompletionRequest) -> Result<CompletionResponse, UxmcpError>;
}

/// Wraps a [`CompletionProvider`], applying JSON-mode extraction and the
/// bounded retry policy uniformly across providers.
pub struct CompletionInterface {
    provider: std::sync::Arc<dyn CompletionProvider>,
}

impl CompletionInterface {
    pub fn new(provider: std::sync::Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    pub async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, UxmcpError> {
        let mut attempt = 0;
        loop {
            match self.provider.complete_raw(&req).await {
                Ok(resp) => return self.post_process(req.mode, resp),
                Err(e) if attempt + 1 < RETRY_MAX_ATTEMPTS && is_retryable(&e) => {
                    tokio::time::sleep(std::time::Duration::from_millis(retry_delay_ms(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn post_process(&self, mode: CompletionMode, resp: CompletionResponse) -> Result<CompletionResponse, UxmcpError> {
        if mode != CompletionMode::Json {
            return Ok(resp);
        }
        let Some(raw) = &resp.message else { return Ok(resp) };
        if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
            return Ok(resp);
        }
        let stripped = strip_code_fences(raw);
        if serde_json::from_str::<serde_json::Value>(&stripped).is_ok() {
            return Ok(CompletionResponse { message: Some(stripped), ..resp });
        }
        Err(UxmcpError::new(ErrorKind::BadJson, "provider did not return parseable JSON"))
    }
}

fn is_retryable(err: &UxmcpError) -> bool {
    matches!(err.kind, ErrorKind::ProviderRateLimited | ErrorKind::ProviderUnavailable)
}

/// Best-effort extraction of a JSON body wrapped in ```json fences (spec §4.7).
fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim().to_string()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(CompletionResponse);

    #[async_trait]
    impl CompletionProvider for FixedProvider {
        async fn complete_raw(&self, _req: &CompletionRequest) -> Result<CompletionResponse, UxmcpError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn json_mode_strips_code_fences() {
        let provider = FixedProvider(CompletionResponse {
            message: Some("```json\n{\"a\": 1}\n```".to_string()),
            tool_calls: vec![],
            usage: Usage::default(),
        });
        let iface = CompletionInterface::new(std::sync::Arc::new(provider));
        let resp = iface
            .complete(CompletionRequest {
                messages: vec![Message::user("x")],
                tools: vec![],
                mode: CompletionMode::Json,
                temperature: None,
                max_tokens: None,
            })
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&resp.message.unwrap()).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[tokio::test]
    async fn json_mode_rejects_unparseable_output() {
        let provider = FixedProvider(CompletionResponse {
            message: Some("not json at all".to_string()),
            tool_calls: vec![],
            usage: Usage::default(),
        });
        let iface = CompletionInterface::new(std::sync::Arc::new(provider));
        let err = iface
            .complete(CompletionRequest {
                messages: vec![Message::user("x")],
                tools: vec![],
                mode: CompletionMode::Json,
                temperature: None,
                max_tokens: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadJson);
    }

    #[test]
    fn retry_delay_backs_off_and_caps() {
        assert_eq!(retry_delay_ms(0), 500);
        assert_eq!(retry_delay_ms(1), 1000);
        assert_eq!(retry_delay_ms(4), 8000);
    }
}
