pub mod executor;
pub mod meta_agent;
pub mod providers;

pub use executor::{AgentExecutor, ExecutionOptions, ExecutionResult};
pub use meta_agent::{MetaAgentOptions, MetaAgentPipeline, ProgressEvent};
pub use providers::CompletionProviderFactory;
