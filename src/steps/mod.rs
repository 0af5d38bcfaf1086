//! Named units of work
//!
//! A step reads the current [`RunState`] and returns a [`StateUpdate`]; the
//! driver does the merging. Each step makes at most one external call.

use crate::error::WorkflowError;
use crate::llm::LlmProvider;
use crate::state::{RunState, StateUpdate};
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod agent;
pub mod preferences;
pub mod reflection;
pub mod tools;

pub use agent::AgentStep;
pub use preferences::{PreferenceCollectorStep, PreferenceParserStep};
pub use reflection::ReflectionStep;
pub use tools::ToolsStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    PreferenceCollector,
    PreferenceParser,
    Agent,
    Tools,
    Reflection,
}

impl StepName {
    pub const ALL: [StepName; 5] = [
        StepName::PreferenceCollector,
        StepName::PreferenceParser,
        StepName::Agent,
        StepName::Tools,
        StepName::Reflection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::PreferenceCollector => "preference_collector",
            StepName::PreferenceParser => "preference_parser",
            StepName::Agent => "agent",
            StepName::Tools => "tools",
            StepName::Reflection => "reflection",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for a workflow step
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> StepName;

    async fn run(&self, state: &RunState) -> Result<StateUpdate>;
}

/// Lookup from step name to implementation
pub struct StepRegistry {
    steps: HashMap<StepName, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::with_capacity(StepName::ALL.len()),
        }
    }

    pub fn register(&mut self, step: Arc<dyn Step>) {
        self.steps.insert(step.name(), step);
    }

    pub fn get(&self, name: StepName) -> Result<Arc<dyn Step>> {
        self.steps
            .get(&name)
            .cloned()
            .ok_or_else(|| WorkflowError::StepNotRegistered(name.to_string()))
    }

    /// The REIT workflow: analyst bound to the registry's tools, plain critic.
    pub fn standard(
        analyst: Arc<dyn LlmProvider>,
        critic: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        rubric: String,
    ) -> Self {
        let bound = analyst.bind_tools(tools.specs());

        let mut registry = Self::new();
        registry.register(Arc::new(PreferenceCollectorStep));
        registry.register(Arc::new(PreferenceParserStep));
        registry.register(Arc::new(AgentStep::new(bound)));
        registry.register(Arc::new(ToolsStep::new(tools)));
        registry.register(Arc::new(ReflectionStep::new(critic, rubric)));
        registry
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;
    use crate::tools::create_reit_registry;

    #[test]
    fn test_standard_registry_has_every_step() {
        let analyst = ScriptedProvider::new();
        let registry = StepRegistry::standard(
            Arc::new(analyst.clone()),
            Arc::new(ScriptedProvider::new()),
            Arc::new(create_reit_registry(None)),
            "rubric".to_string(),
        );

        for name in StepName::ALL {
            assert_eq!(registry.get(name).unwrap().name(), name);
        }
        assert_eq!(analyst.bound_tools().len(), 3);
    }

    #[test]
    fn test_missing_step_is_an_error() {
        let registry = StepRegistry::new();
        let err = registry.get(StepName::Agent).err().unwrap();
        assert!(matches!(err, WorkflowError::StepNotRegistered(name) if name == "agent"));
    }

    #[test]
    fn test_step_names_serialize_snake_case() {
        for name in StepName::ALL {
            assert_eq!(
                serde_json::to_value(name).unwrap(),
                serde_json::Value::String(name.as_str().to_string())
            );
        }
    }
}
