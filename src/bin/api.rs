use reit_analysis_agent::{
    api::{start_server, RunDefaults},
    config::{AgentConfig, DEFAULT_LIMIT},
    steps::StepRegistry,
    workflow::create_reit_workflow,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Loads .env as well
    let config = AgentConfig::from_env()?;

    info!("REIT Analysis Agent - API Server");
    info!("Port: {}", config.port);

    let steps = StepRegistry::standard(
        config.analyst(DEFAULT_LIMIT)?,
        config.critic()?,
        Arc::new(config.tool_registry()?),
        config.reflection_rubric.clone(),
    );

    let workflow = Arc::new(create_reit_workflow(steps).with_recursion_limit(config.recursion_limit));

    let defaults = RunDefaults {
        analysis_prompt: config.analysis_prompt.clone(),
        limit: DEFAULT_LIMIT,
        max_reflections: config.max_reflections,
    };

    info!("Workflow initialized, starting API server");

    start_server(workflow, defaults, config.port).await?;

    Ok(())
}
