//! Transitions between steps
//!
//! Routing is a pure function of the step that just finished and the merged
//! state; it never performs I/O.

use crate::state::RunState;
use crate::steps::StepName;

/// First step of every run.
pub const ENTRY: StepName = StepName::PreferenceCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Next(StepName),
    End,
}

/// After the analyst: execute pending tool calls, otherwise review the answer.
pub fn tool_router(state: &RunState) -> StepName {
    match state.last_message() {
        Some(message) if message.has_tool_calls() => StepName::Tools,
        _ => StepName::Reflection,
    }
}

/// After the critic: stop on approval or once the retry budget is exceeded.
pub fn reflection_router(state: &RunState) -> Route {
    if state.analysis_approved || state.reflection_count > state.max_reflections {
        Route::End
    } else {
        Route::Next(StepName::Agent)
    }
}

pub fn next_route(after: StepName, state: &RunState) -> Route {
    match after {
        StepName::PreferenceCollector => Route::Next(StepName::PreferenceParser),
        StepName::PreferenceParser => Route::Next(StepName::Agent),
        StepName::Agent => Route::Next(tool_router(state)),
        StepName::Tools => Route::Next(StepName::Agent),
        StepName::Reflection => reflection_router(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, ToolCall};
    use serde_json::json;

    fn with_last(message: Message) -> RunState {
        RunState {
            messages: vec![Message::human("Analyze"), message],
            ..RunState::default()
        }
    }

    #[test]
    fn test_tool_router() {
        let calls = vec![
            ToolCall::new("a", "get_reit_info", json!({"ticker": "A17U.SI"})),
            ToolCall::new("b", "get_reit_info", json!({"ticker": "M44U.SI"})),
        ];
        assert_eq!(tool_router(&with_last(Message::model_with_tools("", calls))), StepName::Tools);
        assert_eq!(tool_router(&with_last(Message::model("done"))), StepName::Reflection);
        assert_eq!(tool_router(&RunState::default()), StepName::Reflection);
    }

    #[test]
    fn test_reflection_router_truth_table() {
        for approved in [false, true] {
            for count in 0..5u32 {
                let state = RunState {
                    analysis_approved: approved,
                    reflection_count: count,
                    max_reflections: 2,
                    ..RunState::default()
                };
                let expected = if approved || count > 2 {
                    Route::End
                } else {
                    Route::Next(StepName::Agent)
                };
                assert_eq!(reflection_router(&state), expected, "approved={} count={}", approved, count);
            }
        }
    }

    #[test]
    fn test_fixed_edges() {
        let state = RunState::default();
        assert_eq!(ENTRY, StepName::PreferenceCollector);
        assert_eq!(
            next_route(StepName::PreferenceCollector, &state),
            Route::Next(StepName::PreferenceParser)
        );
        assert_eq!(
            next_route(StepName::PreferenceParser, &state),
            Route::Next(StepName::Agent)
        );
        assert_eq!(next_route(StepName::Tools, &state), Route::Next(StepName::Agent));
    }
}
