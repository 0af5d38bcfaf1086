//! Runtime configuration
//!
//! Values come from the environment (a `.env` file is loaded first) plus an
//! optional `llm_config.json` describing the analyst and critic models:
//!
//! ```json
//! {
//!   "primary_llm": {"provider": "gemini", "model": "gemini-2.0-flash", "temperature": 1.0},
//!   "reflection_llm": {"provider": "gemini", "temperature": 0.2}
//! }
//! ```

use crate::error::WorkflowError;
use crate::llm::{GeminiClient, LlmProvider, ScriptedProvider};
use crate::state::DEFAULT_MAX_REFLECTIONS;
use crate::tools::{create_reit_registry, FinancialApiClient, ToolRegistry};
use crate::workflow::DEFAULT_RECURSION_LIMIT;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_LLM_CONFIG_PATH: &str = "llm_config.json";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_LIMIT: u32 = 20;

const DEFAULT_RUBRIC: &str = include_str!("../prompts/reflection_rubric.txt");
const DEFAULT_ANALYSIS_PROMPT: &str = include_str!("../prompts/reit_audit_prompt.txt");

//
// ================= LLM Settings =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Scripted,
}

impl ProviderKind {
    pub const VALID: [&'static str; 2] = ["gemini", "scripted"];

    fn parse(value: &str, section: &str) -> Result<Self> {
        match value {
            "gemini" => Ok(ProviderKind::Gemini),
            "scripted" => Ok(ProviderKind::Scripted),
            other => Err(WorkflowError::ConfigError(format!(
                "Invalid provider '{}' for {}. Valid providers: {:?}",
                other,
                section,
                Self::VALID
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::Scripted => write!(f, "scripted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmConfig {
    pub primary_llm: LlmSettings,
    /// Critic model; same as `primary_llm` unless configured.
    pub reflection_llm: LlmSettings,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_llm: LlmSettings::default(),
            reflection_llm: LlmSettings::default(),
        }
    }
}

// File shape before validation; every field may be missing.
#[derive(Debug, Default, Deserialize)]
struct RawLlmConfig {
    primary_llm: Option<RawLlmSettings>,
    reflection_llm: Option<RawLlmSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLlmSettings {
    provider: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
}

impl RawLlmSettings {
    fn resolve(self, base: &LlmSettings, section: &str) -> Result<LlmSettings> {
        let provider = match self.provider {
            Some(name) => ProviderKind::parse(&name, section)?,
            None => base.provider,
        };

        Ok(LlmSettings {
            provider,
            model: self.model.or_else(|| base.model.clone()),
            temperature: self.temperature.unwrap_or(base.temperature),
        })
    }
}

/// Load the model configuration file.
///
/// A missing file or malformed JSON falls back to defaults; an unknown
/// provider name is an error.
pub fn load_llm_config(path: &Path) -> Result<LlmConfig> {
    if !path.exists() {
        info!(path = %path.display(), "LLM config not found, using defaults");
        return Ok(LlmConfig::default());
    }

    let contents = fs::read_to_string(path)?;
    let raw: RawLlmConfig = match serde_json::from_str(&contents) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse LLM config, using defaults");
            RawLlmConfig::default()
        }
    };

    let primary_llm = raw
        .primary_llm
        .unwrap_or_default()
        .resolve(&LlmSettings::default(), "primary_llm")?;

    let reflection_llm = match raw.reflection_llm {
        Some(settings) => settings.resolve(&primary_llm, "reflection_llm")?,
        None => primary_llm.clone(),
    };

    Ok(LlmConfig {
        primary_llm,
        reflection_llm,
    })
}

//
// ================= Prompts =================
//

fn load_prompt(path: Option<&str>, fallback: &str) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path).map_err(|e| {
            WorkflowError::ConfigError(format!("Cannot read prompt file '{}': {}", path, e))
        }),
        None => Ok(fallback.to_string()),
    }
}

/// Fill the `{limit}` placeholder of the analysis prompt.
pub fn render_analysis_prompt(template: &str, limit: u32) -> String {
    template.replace("{limit}", &limit.to_string())
}

//
// ================= Agent Config =================
//

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gemini_api_key: Option<String>,
    pub financial_api_base_url: Option<String>,
    pub llm: LlmConfig,
    pub reflection_rubric: String,
    pub analysis_prompt: String,
    pub max_reflections: u32,
    pub recursion_limit: usize,
    pub port: u16,
}

impl AgentConfig {
    /// Read `.env` and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm_path = non_empty("LLM_CONFIG_PATH")
            .unwrap_or_else(|| DEFAULT_LLM_CONFIG_PATH.to_string());
        let llm = load_llm_config(Path::new(&llm_path))?;

        let reflection_rubric =
            load_prompt(non_empty("REFLECTION_RUBRIC_PATH").as_deref(), DEFAULT_RUBRIC)?;
        let analysis_prompt =
            load_prompt(non_empty("ANALYSIS_PROMPT_PATH").as_deref(), DEFAULT_ANALYSIS_PROMPT)?;

        let config = Self {
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            financial_api_base_url: non_empty("FINANCIAL_API_BASE_URL")
                .or_else(|| non_empty("TOOLS_API_BASE_URL")),
            llm,
            reflection_rubric,
            analysis_prompt,
            max_reflections: parse_var(non_empty("MAX_REFLECTIONS"), "MAX_REFLECTIONS")?
                .unwrap_or(DEFAULT_MAX_REFLECTIONS),
            recursion_limit: parse_var(non_empty("RECURSION_LIMIT"), "RECURSION_LIMIT")?
                .unwrap_or(DEFAULT_RECURSION_LIMIT),
            port: parse_var(non_empty("PORT").or_else(|| non_empty("API_PORT")), "PORT")?
                .unwrap_or(DEFAULT_PORT),
        };

        info!(
            analyst = %config.llm.primary_llm.provider,
            critic = %config.llm.reflection_llm.provider,
            max_reflections = config.max_reflections,
            tools_service = config.financial_api_base_url.is_some(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Run both models offline from canned scripts.
    pub fn scripted(mut self) -> Self {
        self.llm.primary_llm.provider = ProviderKind::Scripted;
        self.llm.reflection_llm.provider = ProviderKind::Scripted;
        self
    }

    pub fn analysis_prompt(&self, limit: u32) -> String {
        render_analysis_prompt(&self.analysis_prompt, limit)
    }

    /// Analyst model. The scripted variant requests a ranking of `limit` REITs.
    pub fn analyst(&self, limit: u32) -> Result<Arc<dyn LlmProvider>> {
        match self.llm.primary_llm.provider {
            ProviderKind::Gemini => self.gemini(&self.llm.primary_llm),
            ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::demo_analyst(limit))),
        }
    }

    pub fn critic(&self) -> Result<Arc<dyn LlmProvider>> {
        match self.llm.reflection_llm.provider {
            ProviderKind::Gemini => self.gemini(&self.llm.reflection_llm),
            ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::demo_critic())),
        }
    }

    fn gemini(&self, settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>> {
        let api_key = self.gemini_api_key.clone().ok_or_else(|| {
            WorkflowError::ConfigError("GEMINI_API_KEY is not set".to_string())
        })?;

        let client = GeminiClient::new(api_key, settings.model.clone(), settings.temperature)?;
        Ok(Arc::new(client))
    }

    pub fn tool_registry(&self) -> Result<ToolRegistry> {
        let api = match &self.financial_api_base_url {
            Some(url) => Some(FinancialApiClient::new(url)?),
            None => {
                warn!("FINANCIAL_API_BASE_URL not set, REIT tools will report errors");
                None
            }
        };
        Ok(create_reit_registry(api))
    }
}

fn parse_var<T>(value: Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| {
                WorkflowError::ConfigError(format!("{} must be a number ('{}'): {}", key, v, e))
            })
        })
        .transpose()
}
