use clap::Parser;
use reit_analysis_agent::{
    config::{AgentConfig, DEFAULT_LIMIT},
    report::{render_report, report_filename},
    state::{RunState, StateUpdate},
    steps::{preferences::preferences_from_answers, StepName, StepRegistry},
    workflow::{create_reit_workflow, new_run_id, RunOutcome, WorkflowEvent},
    UserPreferences,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Singapore REIT analysis with human-in-the-loop preferences
#[derive(Debug, Parser)]
#[command(name = "reit-agent", version)]
struct Cli {
    /// Number of REITs to rank
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: u32,

    /// Critic rejections allowed before the analysis is accepted as is
    #[arg(long)]
    max_reflections: Option<u32>,

    /// Use canned model replies instead of calling Gemini
    #[arg(long)]
    scripted: bool,

    /// Report path (defaults to reit_analysis_<timestamp>.md)
    #[arg(long)]
    output: Option<PathBuf>,
}

fn ask(prompt: &str) -> io::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn collect_preferences() -> io::Result<UserPreferences> {
    println!("[AGENT] Let's gather your investment preferences...\n");

    println!("Risk Tolerance:");
    println!("  - conservative: Minimize volatility, prefer blue-chip sponsors");
    println!("  - moderate: Balanced risk-reward");
    let risk = ask("Your choice [default: moderate]: ")?;

    println!("\nMaximum Price-to-Book ratio:");
    println!("  Enter a ratio (e.g., 1.0) or press Enter for none");
    let max_pb = ask("Your choice [default: none]: ")?;

    let prefs = preferences_from_answers(&risk, &max_pb);

    println!("\n{}", "=".repeat(80));
    println!("YOUR PREFERENCES:");
    println!("- Risk Tolerance: {}", prefs.risk_label());
    println!("- Maximum Price-to-Book: {}", prefs.max_price_to_book_label());
    println!("{}\n", "=".repeat(80));

    Ok(prefs)
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::StepCompleted {
            step: StepName::Tools,
            ..
        } => println!("[TOOLS] Data collection complete\n"),
        WorkflowEvent::ReflectionRejected {
            reflection_count,
            feedback,
            ..
        } => {
            println!(
                "[REFLECTION] Analysis needs improvement (iteration {})",
                reflection_count
            );
            if let Some(feedback) = feedback {
                let preview: String = feedback.chars().take(200).collect();
                println!("[REFLECTION] Feedback: {}...\n", preview);
            }
        }
        WorkflowEvent::ReflectionApproved { .. } => println!("[REFLECTION] Analysis approved!\n"),
        WorkflowEvent::Interrupted { .. } => println!("[AGENT] Waiting for your preferences\n"),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AgentConfig::from_env()?;
    if cli.scripted {
        config = config.scripted();
    }

    println!("--- REIT ANALYSIS AGENT WITH HUMAN-IN-THE-LOOP ---\n");
    println!("[CONFIG] Analyzing top {} REITs\n", cli.limit);

    let steps = StepRegistry::standard(
        config.analyst(cli.limit)?,
        config.critic()?,
        Arc::new(config.tool_registry()?),
        config.reflection_rubric.clone(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let workflow = create_reit_workflow(steps)
        .with_recursion_limit(config.recursion_limit)
        .with_events(tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let run_id = new_run_id();
    let max_reflections = cli.max_reflections.unwrap_or(config.max_reflections);
    let initial = RunState::new(config.analysis_prompt(cli.limit)).with_max_reflections(max_reflections);

    info!(run_id = %run_id, limit = cli.limit, max_reflections, "Starting analysis");

    println!("[AGENT] Initializing...\n");
    let mut outcome = workflow.run_until(&run_id, initial).await?;

    while let RunOutcome::Interrupted { .. } = outcome {
        let prefs = tokio::task::spawn_blocking(collect_preferences).await??;

        workflow
            .inject_update(
                &run_id,
                StateUpdate::new()
                    .user_preferences(prefs)
                    .preferences_collected(false),
            )
            .await?;

        println!("[AGENT] Processing analysis...\n");
        outcome = workflow.resume(&run_id).await?;
    }

    drop(workflow);
    printer.await?;

    let state = outcome.into_state();
    let generated_at = chrono::Utc::now();
    let path = cli
        .output
        .unwrap_or_else(|| PathBuf::from(report_filename(generated_at)));

    std::fs::write(&path, render_report(&state, cli.limit, generated_at))?;

    println!("\n{}", "=".repeat(80));
    println!("Analysis complete! Report saved to: {}", path.display());
    println!("{}", "=".repeat(80));

    Ok(())
}
