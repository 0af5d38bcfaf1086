//! LLM provider trait and implementations
//!
//! The agent step calls a provider with tools bound; the reflection step
//! calls a plain one. Providers are handed to the steps at construction.

use crate::models::{Message, ToolSpec};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod gemini;
pub mod scripted;

pub use gemini::GeminiClient;
pub use scripted::ScriptedProvider;

/// Chat-model boundary used by the workflow steps.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Send the ordered conversation and return one model message.
    async fn invoke(&self, messages: &[Message]) -> Result<Message>;

    /// Variant of this provider that may answer with tool calls.
    fn bind_tools(&self, tools: Vec<ToolSpec>) -> Arc<dyn LlmProvider>;
}
