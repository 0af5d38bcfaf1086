//! Gemini API client
//!
//! Implements [`LlmProvider`] over the `generateContent` endpoint, including
//! function calling. Uses a long-lived reqwest::Client for connection pooling.

use crate::error::WorkflowError;
use crate::llm::LlmProvider;
use crate::models::{Message, ToolCall, ToolSpec};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    tools: Vec<ToolSpec>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: Option<String>, temperature: f32) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(180))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: BASE_URL.to_string(),
            temperature,
            tools: Vec::new(),
        })
    }

    /// Point the client at a different endpoint root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: &[Message]) -> GeminiRequest {
        let tools = if self.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolDeclarations {
                function_declarations: self
                    .tools
                    .iter()
                    .map(|spec| FunctionDeclaration {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        parameters: spec.parameters.clone(),
                    })
                    .collect(),
            }]
        };

        GeminiRequest {
            contents: to_contents(messages),
            tools,
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: 0.95,
                max_output_tokens: 8192,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn invoke(&self, messages: &[Message]) -> Result<Message> {
        if self.api_key.is_empty() {
            return Err(WorkflowError::ProviderError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = self.build_request(messages);

        info!(
            model = %self.model,
            messages = messages.len(),
            tools = self.tools.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                WorkflowError::ProviderError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(WorkflowError::ProviderError(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            WorkflowError::ProviderError(format!("Gemini parse error: {}", e))
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                candidate_tokens = usage.candidates_token_count,
                "Gemini token usage"
            );
        }

        parse_response(gemini_response)
    }

    fn bind_tools(&self, tools: Vec<ToolSpec>) -> Arc<dyn LlmProvider> {
        Arc::new(Self {
            tools,
            ..self.clone()
        })
    }
}

/// Map the conversation log onto Gemini turns.
///
/// Consecutive entries with the same role share one turn, so parallel
/// function responses reach the model together.
fn to_contents(messages: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::with_capacity(messages.len());

    for message in messages {
        let (role, parts) = match message {
            Message::Human { content } => ("user", vec![Part::text(content)]),
            Message::Model {
                content,
                tool_calls,
            } => {
                let mut parts = Vec::with_capacity(tool_calls.len() + 1);
                if !content.is_empty() || tool_calls.is_empty() {
                    parts.push(Part::text(content));
                }
                parts.extend(tool_calls.iter().map(Part::function_call));
                ("model", parts)
            }
            Message::ToolResult { name, content, .. } => {
                ("user", vec![Part::function_response(name, content)])
            }
        };

        match contents.last_mut() {
            Some(last) if last.role == role => last.parts.extend(parts),
            _ => contents.push(Content {
                role: role.to_string(),
                parts,
            }),
        }
    }

    contents
}

fn parse_response(response: GeminiResponse) -> Result<Message> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        WorkflowError::ProviderError("No response from Gemini API".to_string())
    })?;

    let content = candidate.content.ok_or_else(|| {
        WorkflowError::ProviderError(format!(
            "Gemini returned no content (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        ))
    })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in content.parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(call) = part.function_call {
            let id = call
                .id
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            tool_calls.push(ToolCall {
                id,
                name: call.name,
                args: call.args,
            });
        }
    }

    Ok(Message::model_with_tools(text, tool_calls))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    fn function_call(call: &ToolCall) -> Self {
        Self {
            function_call: Some(FunctionCall {
                id: None,
                name: call.name.clone(),
                args: call.args.clone(),
            }),
            ..Self::default()
        }
    }

    fn function_response(name: &str, content: &str) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.to_string(),
                response: json!({ "content": content }),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}
