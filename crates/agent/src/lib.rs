//! The conversational core: context assembly, the bounded tool-calling loop,
//! tool executors, identity resolution, and the post-reply insight pass.

pub mod context;
pub mod executor;
pub mod identity;
pub mod insight;
pub mod llm;
pub mod runtime;
pub mod schema;

pub use context::{CatalogSnapshot, ContextBuilder, RequestContext};
pub use executor::{ExecutorContext, ToolExecutor, ToolOutcome};
pub use identity::{ContactHints, IdentityResolver};
pub use insight::InsightSummarizer;
pub use llm::{AssistantTurn, ChatMessage, HttpLlmClient, LlmClient, LlmError, ToolCallRequest};
pub use runtime::{AgentError, AgentRuntime, CompletedAction, TurnOutcome};
pub use schema::{tool_declarations, ToolName};
