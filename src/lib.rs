//! REIT Analysis Agent
//!
//! An LLM agent that ranks and audits Singapore REITs:
//! - Pauses once to collect investor preferences (human in the loop)
//! - Lets the analyst model call market-data tools in a loop
//! - Has a second model critique the answer and request bounded revisions
//! - Persists paused runs as checkpoints so they can be resumed
//!
//! WORKFLOW:
//! COLLECT ⏸ → PARSE → AGENT ⇄ TOOLS → REFLECT → (AGENT | END)

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod critic;
pub mod error;
pub mod llm;
pub mod models;
pub mod report;
pub mod router;
pub mod state;
pub mod steps;
pub mod tools;
pub mod workflow;

pub use error::{Result, WorkflowError};

// Re-export common types
pub use models::*;
pub use state::{RunState, StateUpdate};
pub use workflow::{RunOutcome, Workflow, WorkflowEvent};
