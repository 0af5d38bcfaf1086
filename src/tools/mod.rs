//! Tool trait and registry
//!
//! Tools are bound to the analyst model by their [`ToolSpec`] and executed by
//! the tools step. HTTP-backed tools call the market-data service.

use crate::error::WorkflowError;
use crate::models::ToolSpec;
use crate::Result;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

pub mod reits;

pub use reits::{AnalyzeTopReitsTool, GetReitInfoTool, SearchReitQualitativeInfoTool};

/// Trait for a single tool callable by the model
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<String>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    // ordered so the bound schema is stable between runs
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Client for the market-data and web-search service behind the REIT tools.
#[derive(Clone)]
pub struct FinancialApiClient {
    client: Client,
    base_url: String,
}

impl FinancialApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("FINANCIAL_API_BASE_URL")
            .or_else(|_| env::var("TOOLS_API_BASE_URL"))
            .ok()?;

        Self::new(&base_url).ok()
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                WorkflowError::ToolError(format!(
                    "Financial API request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| WorkflowError::ToolError(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(WorkflowError::ToolError(format!(
                "Financial API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

pub(crate) fn require_api(api: &Option<FinancialApiClient>) -> Result<&FinancialApiClient> {
    api.as_ref().ok_or_else(|| {
        WorkflowError::ToolError(
            "FINANCIAL_API_BASE_URL (or TOOLS_API_BASE_URL) is not configured".to_string(),
        )
    })
}

pub(crate) fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkflowError::InvalidToolInput(format!("Expected '{}' string argument", key)))
}

/// Registry of the three REIT tools against the given service.
pub fn create_reit_registry(api: Option<FinancialApiClient>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(GetReitInfoTool::new(api.clone())));
    registry.register(Arc::new(AnalyzeTopReitsTool::new(api.clone())));
    registry.register(Arc::new(SearchReitQualitativeInfoTool::new(api)));
    registry
}

/// Create a default registry with the service taken from the environment.
pub fn create_default_registry() -> ToolRegistry {
    create_reit_registry(FinancialApiClient::from_env())
}
