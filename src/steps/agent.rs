//! Analyst step (producer side of the reflection loop)

use crate::error::WorkflowError;
use crate::llm::LlmProvider;
use crate::models::Message;
use crate::state::{RunState, StateUpdate};
use crate::steps::preferences::preference_context;
use crate::steps::{Step, StepName};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

fn rejection_notice(feedback: Option<&str>, attempt: u32) -> String {
    format!(
        r#"
REFLECTION FEEDBACK - PREVIOUS ANALYSIS REJECTED (revision {attempt})
============================================
Your previous analysis was reviewed and REJECTED for the following reasons:

{feedback}

REQUIRED ACTIONS:
1. Call the available tools again (get_reit_info, search_reit_qualitative_info)
   to gather the missing data BEFORE writing a new answer.
2. Address every point in the feedback explicitly.
3. Produce a complete, revised analysis that stands on its own.
============================================
"#,
        attempt = attempt,
        feedback = feedback.unwrap_or("No specific feedback was provided."),
    )
}

/// Conversation sent to the analyst model for this turn.
///
/// On a retry, earlier final answers are left out of the request (they are
/// still in the run state); everything else is kept in order.
pub fn build_request(state: &RunState) -> Vec<Message> {
    let retrying = state.reflection_count > 0;
    let mut request = Vec::with_capacity(state.messages.len() + 2);

    if retrying {
        request.push(Message::human(rejection_notice(
            state.reflection_feedback.as_deref(),
            state.reflection_count,
        )));
    }

    if state.preferences_collected && !state.user_preferences.is_empty() {
        request.push(Message::human(preference_context(&state.user_preferences)));
    }

    if retrying {
        request.extend(
            state
                .messages
                .iter()
                .filter(|m| !m.is_analysis())
                .cloned(),
        );
    } else {
        request.extend(state.messages.iter().cloned());
    }

    request
}

pub struct AgentStep {
    llm: Arc<dyn LlmProvider>,
}

impl AgentStep {
    /// `llm` should already have the tool schema bound.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Step for AgentStep {
    fn name(&self) -> StepName {
        StepName::Agent
    }

    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let request = build_request(state);

        debug!(
            provider = self.llm.name(),
            request_messages = request.len(),
            reflection_count = state.reflection_count,
            "Invoking analyst model"
        );

        let response = self.llm.invoke(&request).await?;

        if !matches!(response, Message::Model { .. }) {
            return Err(WorkflowError::ProviderError(
                "analyst provider returned a non-model message".to_string(),
            ));
        }

        info!(
            tool_calls = response.tool_calls().len(),
            "Analyst responded"
        );

        Ok(StateUpdate::new().message(response))
    }
}
