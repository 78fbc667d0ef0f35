//! Resolves a concrete LLM provider for a profile. Wire-format adapters for
//! specific vendors are outside this crate's scope (spec §1: "LLM provider
//! wire formats... treated as a `Completion` interface"); this trait is the
//! seam a deployment plugs a real adapter into.

use std::sync::Arc;
use uxmcp_core::completion::CompletionProvider;
use uxmcp_core::error::UxmcpError;
use uxmcp_core::model::LlmProfile;

pub trait CompletionProviderFactory: Send + Sync + 'static {
    fn build(&self, profile: &LlmProfile) -> Result<Arc<dyn CompletionProvider>, UxmcpError>;
}
