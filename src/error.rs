//! Error types for the REIT analysis workflow

use thiserror::Error;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Error, Debug)]
pub enum WorkflowError {

    // =============================
    // Workflow Engine Errors
    // =============================

    /// A state update referenced a field the run state does not declare,
    /// or carried a value of the wrong shape.
    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("LLM provider error: {0}")]
    ProviderError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("No checkpoint for run: {0}")]
    CheckpointNotFound(String),

    #[error("Run already has a checkpoint: {0}")]
    RunAlreadyExists(String),

    #[error("Recursion limit of {0} steps reached without finishing")]
    RecursionLimit(usize),

    #[error("Step not registered: {0}")]
    StepNotRegistered(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
