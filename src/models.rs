//! Core data models for the REIT analysis agent

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

//
// ================= Preferences =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
}

impl RiskTolerance {
    /// Lenient parse used by the CLI and HTTP surfaces.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "conservative" => Some(RiskTolerance::Conservative),
            "moderate" => Some(RiskTolerance::Moderate),
            _ => None,
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTolerance::Conservative => "conservative",
            RiskTolerance::Moderate => "moderate",
        };
        write!(f, "{}", s)
    }
}

/// Investment preferences supplied by the human between pause and resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tolerance: Option<RiskTolerance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price_to_book: Option<f64>,
}

impl UserPreferences {
    pub fn is_empty(&self) -> bool {
        self.risk_tolerance.is_none() && self.max_price_to_book.is_none()
    }

    pub fn risk_label(&self) -> String {
        self.risk_tolerance
            .map(|r| r.to_string())
            .unwrap_or_else(|| "Not specified".to_string())
    }

    pub fn max_price_to_book_label(&self) -> String {
        self.max_price_to_book
            .map(|pb| pb.to_string())
            .unwrap_or_else(|| "No limit".to_string())
    }
}

//
// ================= Messages =================
//

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// One entry of the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    Human {
        content: String,
    },
    Model {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Message::Model {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn model_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Model {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::Human { content }
            | Message::Model { content, .. }
            | Message::ToolResult { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Model { tool_calls, .. } => tool_calls,
            Message::Human { .. } | Message::ToolResult { .. } => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// A model answer with no tool calls, i.e. an analysis the critic can judge.
    pub fn is_analysis(&self) -> bool {
        matches!(self, Message::Model { tool_calls, .. } if tool_calls.is_empty())
    }
}

//
// ================= Tool Schema =================
//

/// Declaration of a tool as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_roles_serialize_as_tags() {
        let msg = Message::model_with_tools(
            "",
            vec![ToolCall::new("call_1", "get_reit_info", json!({"ticker": "C38U.SI"}))],
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "model");
        assert_eq!(value["tool_calls"][0]["args"]["ticker"], "C38U.SI");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_analysis_detection() {
        assert!(Message::model("final answer").is_analysis());
        assert!(!Message::human("question").is_analysis());
        assert!(!Message::tool_result("c", "t", "out").is_analysis());

        let with_calls = Message::model_with_tools(
            "thinking",
            vec![ToolCall::new("c", "analyze_top_singapore_reits", json!({}))],
        );
        assert!(!with_calls.is_analysis());
        assert!(with_calls.has_tool_calls());
    }

    #[test]
    fn test_preference_labels() {
        let empty = UserPreferences::default();
        assert!(empty.is_empty());
        assert_eq!(empty.risk_label(), "Not specified");
        assert_eq!(empty.max_price_to_book_label(), "No limit");

        let prefs = UserPreferences {
            risk_tolerance: RiskTolerance::parse(" Conservative "),
            max_price_to_book: Some(1.0),
        };
        assert_eq!(prefs.risk_label(), "conservative");
        assert_eq!(prefs.max_price_to_book_label(), "1");
        assert_eq!(RiskTolerance::parse("aggressive"), None);
    }
}
