//! Tool execution step

use crate::error::WorkflowError;
use crate::models::Message;
use crate::state::{RunState, StateUpdate};
use crate::steps::{Step, StepName};
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Runs every tool call of the latest model message, in request order.
pub struct ToolsStep {
    registry: Arc<ToolRegistry>,
}

impl ToolsStep {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Step for ToolsStep {
    fn name(&self) -> StepName {
        StepName::Tools
    }

    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let calls = state
            .last_message()
            .map(Message::tool_calls)
            .unwrap_or_default();

        if calls.is_empty() {
            warn!("Tools step reached without pending tool calls");
            return Ok(StateUpdate::new());
        }

        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            // names come from the bound schema, so a miss is a wiring bug
            let tool = self
                .registry
                .get(&call.name)
                .ok_or_else(|| WorkflowError::ToolNotFound(call.name.clone()))?;

            let start = Instant::now();
            let output = match tool.invoke(&call.args).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                    format!("Error: {} failed: {}", call.name, e)
                }
            };

            debug!(
                tool = %call.name,
                call_id = %call.id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Tool executed"
            );

            results.push(Message::tool_result(call.id.clone(), call.name.clone(), output));
        }

        Ok(StateUpdate::new().messages(results))
    }
}
