//! Run state and its merge rules
//!
//! Every step returns a partial [`StateUpdate`]; the driver folds it into the
//! authoritative [`RunState`] with [`RunState::merge`]. `messages` appends,
//! every other field is replaced wholesale.

use crate::error::WorkflowError;
use crate::models::{Message, UserPreferences};
use crate::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_REFLECTIONS: u32 = 2;

/// How a field combines an update with its current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldReducer {
    Append,
    Replace,
}

/// Declared fields of the run state.
pub const SCHEMA: &[(&str, FieldReducer)] = &[
    ("messages", FieldReducer::Append),
    ("user_preferences", FieldReducer::Replace),
    ("preferences_collected", FieldReducer::Replace),
    ("needs_clarification", FieldReducer::Replace),
    ("clarification_question", FieldReducer::Replace),
    ("reflection_count", FieldReducer::Replace),
    ("max_reflections", FieldReducer::Replace),
    ("reflection_feedback", FieldReducer::Replace),
    ("analysis_approved", FieldReducer::Replace),
];

pub fn reducer_for(field: &str) -> Option<FieldReducer> {
    SCHEMA
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, reducer)| *reducer)
}

fn default_max_reflections() -> u32 {
    DEFAULT_MAX_REFLECTIONS
}

/// The record threaded through every step of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub user_preferences: UserPreferences,
    #[serde(default)]
    pub preferences_collected: bool,
    /// Reserved schema field for a clarification turn; no step sets it yet.
    #[serde(default)]
    pub needs_clarification: bool,
    /// Reserved alongside `needs_clarification`.
    #[serde(default)]
    pub clarification_question: Option<String>,
    #[serde(default)]
    pub reflection_count: u32,
    #[serde(default = "default_max_reflections")]
    pub max_reflections: u32,
    #[serde(default)]
    pub reflection_feedback: Option<String>,
    #[serde(default)]
    pub analysis_approved: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            user_preferences: UserPreferences::default(),
            preferences_collected: false,
            needs_clarification: false,
            clarification_question: None,
            reflection_count: 0,
            max_reflections: DEFAULT_MAX_REFLECTIONS,
            reflection_feedback: None,
            analysis_approved: false,
        }
    }
}

impl RunState {
    /// Fresh state seeded with the user's request.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::human(prompt)],
            ..Self::default()
        }
    }

    pub fn with_max_reflections(mut self, max_reflections: u32) -> Self {
        self.max_reflections = max_reflections;
        self
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent model answer without tool calls.
    pub fn latest_analysis(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_analysis())
    }

    /// Fold a partial update into the state.
    pub fn merge(mut self, update: StateUpdate) -> Self {
        self.messages.extend(update.messages);

        if let Some(prefs) = update.user_preferences {
            self.user_preferences = prefs;
        }
        if let Some(collected) = update.preferences_collected {
            self.preferences_collected = collected;
        }
        if let Some(needs) = update.needs_clarification {
            self.needs_clarification = needs;
        }
        if let Some(question) = update.clarification_question {
            self.clarification_question = question;
        }
        if let Some(count) = update.reflection_count {
            self.reflection_count = count;
        }
        if let Some(max) = update.max_reflections {
            self.max_reflections = max;
        }
        if let Some(feedback) = update.reflection_feedback {
            self.reflection_feedback = feedback;
        }
        if let Some(approved) = update.analysis_approved {
            self.analysis_approved = approved;
        }

        self
    }

    /// Check an update arriving from outside the workflow against this state.
    ///
    /// Reflection bookkeeping belongs to the reflection step, preferences can
    /// only be marked collected by the parser, and injected messages are
    /// limited to human turns and results for tool calls still awaiting one.
    pub fn check_external(&self, update: &StateUpdate) -> Result<()> {
        let reserved = [
            ("reflection_count", update.reflection_count.is_some()),
            ("max_reflections", update.max_reflections.is_some()),
            ("reflection_feedback", update.reflection_feedback.is_some()),
            ("analysis_approved", update.analysis_approved.is_some()),
        ];
        if let Some((field, _)) = reserved.iter().find(|(_, set)| *set) {
            return Err(WorkflowError::SchemaError(format!(
                "'{}' is managed by the workflow and cannot be injected",
                field
            )));
        }

        if self.preferences_collected && update.preferences_collected == Some(false) {
            return Err(WorkflowError::SchemaError(
                "preferences_collected cannot go back to false".to_string(),
            ));
        }

        let mut pending: Vec<&str> = Vec::new();
        for message in &self.messages {
            match message {
                Message::Model { tool_calls, .. } => {
                    pending.extend(tool_calls.iter().map(|call| call.id.as_str()))
                }
                Message::ToolResult { call_id, .. } => pending.retain(|id| *id != call_id.as_str()),
                Message::Human { .. } => {}
            }
        }

        for message in &update.messages {
            match message {
                Message::Human { .. } => {}
                Message::Model { .. } => {
                    return Err(WorkflowError::SchemaError(
                        "model messages cannot be injected".to_string(),
                    ))
                }
                Message::ToolResult { call_id, .. } => {
                    let Some(pos) = pending.iter().position(|id| *id == call_id.as_str()) else {
                        return Err(WorkflowError::SchemaError(format!(
                            "tool_result '{}' answers no pending tool call",
                            call_id
                        )));
                    };
                    pending.remove(pos);
                }
            }
        }

        Ok(())
    }
}

/// Keeps an explicit `null` distinct from an absent key.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Partial update produced by a step or injected from outside.
///
/// `None` means "field absent". For the optional text fields the inner
/// `Option` is the new value, so `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_preferences: Option<UserPreferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences_collected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_clarification: Option<bool>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reflections: Option<u32>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub reflection_feedback: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_approved: Option<bool>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an untyped update against the schema.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = &value else {
            return Err(WorkflowError::SchemaError(
                "state update must be a JSON object".to_string(),
            ));
        };

        if let Some(unknown) = fields.keys().find(|key| reducer_for(key).is_none()) {
            return Err(WorkflowError::SchemaError(format!(
                "unknown state field '{}'",
                unknown
            )));
        }

        serde_json::from_value(value).map_err(|e| WorkflowError::SchemaError(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn user_preferences(mut self, prefs: UserPreferences) -> Self {
        self.user_preferences = Some(prefs);
        self
    }

    pub fn preferences_collected(mut self, collected: bool) -> Self {
        self.preferences_collected = Some(collected);
        self
    }

    pub fn reflection_count(mut self, count: u32) -> Self {
        self.reflection_count = Some(count);
        self
    }

    pub fn max_reflections(mut self, max: u32) -> Self {
        self.max_reflections = Some(max);
        self
    }

    pub fn reflection_feedback(mut self, feedback: Option<String>) -> Self {
        self.reflection_feedback = Some(feedback);
        self
    }

    pub fn analysis_approved(mut self, approved: bool) -> Self {
        self.analysis_approved = Some(approved);
        self
    }

    /// Per-field union of two updates, `later` winning on replace fields.
    pub fn then(mut self, later: StateUpdate) -> Self {
        self.messages.extend(later.messages);
        self.user_preferences = later.user_preferences.or(self.user_preferences);
        self.preferences_collected = later.preferences_collected.or(self.preferences_collected);
        self.needs_clarification = later.needs_clarification.or(self.needs_clarification);
        self.clarification_question = later.clarification_question.or(self.clarification_question);
        self.reflection_count = later.reflection_count.or(self.reflection_count);
        self.max_reflections = later.max_reflections.or(self.max_reflections);
        self.reflection_feedback = later.reflection_feedback.or(self.reflection_feedback);
        self.analysis_approved = later.analysis_approved.or(self.analysis_approved);
        self
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskTolerance;
    use serde_json::json;

    #[test]
    fn test_messages_append_and_scalars_replace() {
        let state = RunState::new("Analyze REITs");
        let next = state.clone().merge(
            StateUpdate::new()
                .message(Message::model("analysis"))
                .reflection_count(1)
                .reflection_feedback(Some("Add tenant names".into())),
        );

        assert_eq!(next.messages.len(), 2);
        assert_eq!(next.messages[0], state.messages[0]);
        assert_eq!(next.reflection_count, 1);
        assert_eq!(next.reflection_feedback.as_deref(), Some("Add tenant names"));
        // untouched fields carry over
        assert_eq!(next.max_reflections, DEFAULT_MAX_REFLECTIONS);
        assert!(!next.preferences_collected);
    }

    #[test]
    fn test_optional_field_can_be_cleared() {
        let state = RunState {
            reflection_feedback: Some("old".into()),
            ..RunState::default()
        };
        let next = state.merge(StateUpdate::new().reflection_feedback(None));
        assert_eq!(next.reflection_feedback, None);
    }

    #[test]
    fn test_sequential_merge_equals_merged_union() {
        let base = RunState::new("start");
        let first = StateUpdate::new()
            .message(Message::model("one"))
            .reflection_count(1)
            .analysis_approved(false);
        let second = StateUpdate::new()
            .message(Message::human("two"))
            .reflection_feedback(Some("fix".into()))
            .analysis_approved(true);

        let sequential = base.clone().merge(first.clone()).merge(second.clone());
        let combined = base.merge(first.then(second));
        assert_eq!(sequential, combined);
    }

    #[test]
    fn test_from_value_rejects_unknown_field() {
        let err = StateUpdate::from_value(json!({"portfolio": "AAPL"})).unwrap_err();
        assert!(matches!(err, WorkflowError::SchemaError(msg) if msg.contains("portfolio")));

        let err = StateUpdate::from_value(json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, WorkflowError::SchemaError(_)));

        let err = StateUpdate::from_value(json!({"reflection_count": "two"})).unwrap_err();
        assert!(matches!(err, WorkflowError::SchemaError(_)));
    }

    #[test]
    fn test_from_value_accepts_preferences_and_null_clears() {
        let update = StateUpdate::from_value(json!({
            "user_preferences": {"risk_tolerance": "conservative"},
            "preferences_collected": false,
            "reflection_feedback": null
        }))
        .unwrap();

        assert_eq!(
            update.user_preferences.as_ref().and_then(|p| p.risk_tolerance),
            Some(RiskTolerance::Conservative)
        );
        assert_eq!(update.preferences_collected, Some(false));
        assert_eq!(update.reflection_feedback, Some(None));
        assert_eq!(update.clarification_question, None);
    }

    #[test]
    fn test_schema_declares_every_state_field() {
        let value = serde_json::to_value(RunState::default()).unwrap();
        let fields = value.as_object().unwrap();
        assert_eq!(fields.len(), SCHEMA.len());
        for key in fields.keys() {
            assert!(reducer_for(key).is_some(), "{} missing from schema", key);
        }
        assert_eq!(reducer_for("messages"), Some(FieldReducer::Append));
    }

    #[test]
    fn test_external_update_cannot_touch_reflection_fields() {
        let state = RunState::new("Analyze");
        for update in [
            json!({"reflection_count": 7}),
            json!({"max_reflections": 0}),
            json!({"analysis_approved": true}),
            json!({"reflection_feedback": null}),
        ] {
            let update = StateUpdate::from_value(update).unwrap();
            let err = state.check_external(&update).unwrap_err();
            assert!(matches!(err, WorkflowError::SchemaError(_)));
        }

        let prefs = StateUpdate::new()
            .user_preferences(UserPreferences::default())
            .preferences_collected(false)
            .message(Message::human("note"));
        assert!(state.check_external(&prefs).is_ok());
    }

    #[test]
    fn test_external_update_cannot_uncollect_preferences() {
        let collected = RunState {
            preferences_collected: true,
            ..RunState::new("Analyze")
        };
        let err = collected
            .check_external(&StateUpdate::new().preferences_collected(false))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SchemaError(msg) if msg.contains("preferences_collected")));
        assert!(collected
            .check_external(&StateUpdate::new().preferences_collected(true))
            .is_ok());
    }

    #[test]
    fn test_external_tool_result_must_answer_pending_call() {
        use crate::models::ToolCall;

        let state = RunState::new("Analyze").merge(StateUpdate::new().message(
            Message::model_with_tools("", vec![ToolCall::new("call_1", "get_reit_info", json!({}))]),
        ));

        let answer = StateUpdate::new().message(Message::tool_result("call_1", "get_reit_info", "{}"));
        assert!(state.check_external(&answer).is_ok());

        let ghost = StateUpdate::new().message(Message::tool_result("ghost", "get_reit_info", "{}"));
        assert!(matches!(state.check_external(&ghost), Err(WorkflowError::SchemaError(_))));

        let twice = answer.clone().then(answer.clone());
        assert!(state.check_external(&twice).is_err());

        let answered = state.clone().merge(answer.clone());
        assert!(answered.check_external(&answer).is_err());

        let model = StateUpdate::new().message(Message::model("forged analysis"));
        assert!(state.check_external(&model).is_err());
    }

    #[test]
    fn test_clarification_fields_merge_like_other_fields() {
        let update = StateUpdate::from_value(json!({
            "needs_clarification": true,
            "clarification_question": "Which sector?"
        }))
        .unwrap();
        let state = RunState::new("Analyze");
        assert!(state.check_external(&update).is_ok());

        let state = state.merge(update);
        assert!(state.needs_clarification);
        assert_eq!(state.clarification_question.as_deref(), Some("Which sector?"));

        let cleared = state.merge(StateUpdate::from_value(json!({"clarification_question": null})).unwrap());
        assert_eq!(cleared.clarification_question, None);
        assert!(cleared.needs_clarification);
    }
}
