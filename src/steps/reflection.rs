//! Critic step of the reflection loop

use crate::critic::parse_critic_response;
use crate::llm::LlmProvider;
use crate::models::Message;
use crate::state::{RunState, StateUpdate};
use crate::steps::{Step, StepName};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const NO_ANALYSIS_FEEDBACK: &str =
    "No analysis found to evaluate. Produce a complete written analysis before review.";

pub struct ReflectionStep {
    critic: Arc<dyn LlmProvider>,
    rubric: String,
}

impl ReflectionStep {
    pub fn new(critic: Arc<dyn LlmProvider>, rubric: String) -> Self {
        Self { critic, rubric }
    }

    fn review_prompt(&self, analysis: &str) -> String {
        format!(
            "{}\n\n---\n\nANALYSIS TO EVALUATE:\n\n{}\n\n---\n\nProvide your evaluation in the specified JSON format.",
            self.rubric, analysis
        )
    }
}

fn approved() -> StateUpdate {
    StateUpdate::new()
        .analysis_approved(true)
        .reflection_feedback(None)
}

#[async_trait]
impl Step for ReflectionStep {
    fn name(&self) -> StepName {
        StepName::Reflection
    }

    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        if state.reflection_count >= state.max_reflections {
            info!(
                reflection_count = state.reflection_count,
                max_reflections = state.max_reflections,
                "Reflection budget spent, accepting current analysis"
            );
            return Ok(approved());
        }

        let analysis = match state.latest_analysis() {
            Some(message) => message.content().to_string(),
            None => {
                warn!("No analysis message to review");
                return Ok(StateUpdate::new()
                    .analysis_approved(false)
                    .reflection_feedback(Some(NO_ANALYSIS_FEEDBACK.to_string())));
            }
        };

        let request = [Message::human(self.review_prompt(&analysis))];
        let reply = match self.critic.invoke(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Critic unavailable, approving analysis");
                return Ok(approved());
            }
        };

        let verdict = parse_critic_response(reply.content());

        if verdict.approved {
            info!(reflection_count = state.reflection_count, "Analysis approved");
            return Ok(approved());
        }

        let feedback = verdict
            .feedback
            .unwrap_or_else(|| crate::critic::DEFAULT_REJECTION_FEEDBACK.to_string());
        let count = state.reflection_count + 1;

        info!(
            reflection_count = count,
            max_reflections = state.max_reflections,
            "Analysis rejected"
        );

        Ok(StateUpdate::new()
            .analysis_approved(false)
            .reflection_count(count)
            .reflection_feedback(Some(feedback)))
    }
}
