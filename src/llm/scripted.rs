//! Scripted provider for tests and the offline demo
//!
//! Replays queued replies in order and records every request it receives.

use crate::error::WorkflowError;
use crate::llm::LlmProvider;
use crate::models::{Message, ToolCall, ToolSpec};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct Script {
    replies: Mutex<VecDeque<std::result::Result<Message, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    bound_tools: Mutex<Vec<ToolSpec>>,
}

/// Clones (and tool-bound variants) share one script.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: Message) -> Self {
        self.push_reply(reply);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_reply(Message::model(text))
    }

    pub fn with_error(self, error: &str) -> Self {
        self.script.replies.lock().push_back(Err(error.to_string()));
        self
    }

    pub fn push_reply(&self, reply: Message) {
        self.script.replies.lock().push_back(Ok(reply));
    }

    /// Every conversation sent so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.script.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.requests.lock().len()
    }

    pub fn bound_tools(&self) -> Vec<ToolSpec> {
        self.script.bound_tools.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.replies.lock().len()
    }

    /// Analyst script for `--scripted` runs: fetch the ranking, then answer.
    pub fn demo_analyst(limit: u32) -> Self {
        Self::new()
            .with_reply(Message::model_with_tools(
                "",
                vec![ToolCall::new(
                    "call_demo_rankings",
                    "analyze_top_singapore_reits",
                    json!({ "limit": limit }),
                )],
            ))
            .with_text(
                "Scripted analysis: ranked the largest Singapore REITs by market cap, \
                 price-to-book, dividend yield, gearing and interest coverage, and \
                 matched them against the stated risk profile.",
            )
    }

    /// Critic script for `--scripted` runs: approve the first analysis.
    pub fn demo_critic() -> Self {
        Self::new().with_text(r#"{"approved": true, "quality_score": 7, "feedback": null}"#)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, messages: &[Message]) -> Result<Message> {
        self.script.requests.lock().push(messages.to_vec());

        let next = self.script.replies.lock().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(error)) => Err(WorkflowError::ProviderError(error)),
            None => Err(WorkflowError::ProviderError(
                "scripted provider has no replies left".to_string(),
            )),
        }
    }

    fn bind_tools(&self, tools: Vec<ToolSpec>) -> Arc<dyn LlmProvider> {
        *self.script.bound_tools.lock() = tools;
        Arc::new(self.clone())
    }
}
