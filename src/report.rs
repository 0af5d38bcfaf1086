//! Markdown report for a finished run

use crate::models::Message;
use crate::state::RunState;
use chrono::{DateTime, Utc};

const RANKING_TOOL: &str = "analyze_top_singapore_reits";

/// Output of the most recent ranking tool call, if any.
pub fn ranking_output(state: &RunState) -> Option<&str> {
    state.messages.iter().rev().find_map(|m| match m {
        Message::ToolResult { name, content, .. } if name == RANKING_TOOL => Some(content.as_str()),
        _ => None,
    })
}

pub fn report_filename(generated_at: DateTime<Utc>) -> String {
    format!("reit_analysis_{}.md", generated_at.format("%Y%m%d_%H%M%S"))
}

pub fn render_report(state: &RunState, limit: u32, generated_at: DateTime<Utc>) -> String {
    let raw = ranking_output(state).unwrap_or("No tool output captured");
    let analysis = state
        .latest_analysis()
        .map(Message::content)
        .filter(|c| !c.trim().is_empty())
        .unwrap_or("No AI analysis captured");

    let review = if state.analysis_approved && state.reflection_count == 0 {
        "Approved on first review.".to_string()
    } else if state.analysis_approved {
        format!(
            "Approved after {} revision(s) (limit {}).",
            state.reflection_count, state.max_reflections
        )
    } else {
        format!(
            "Not approved after {} revision(s).",
            state.reflection_count
        )
    };

    let mut out = String::new();

    out.push_str("# Singapore REIT Analysis Report\n\n");
    out.push_str(&format!(
        "**Generated:** {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "**Query:** Analyze top {} Singapore REITs with user preferences\n\n",
        limit
    ));

    out.push_str("## Investor Profile\n\n");
    out.push_str(&format!(
        "- Risk Tolerance: {}\n- Max P/B: {}\n\n---\n\n",
        state.user_preferences.risk_label(),
        state.user_preferences.max_price_to_book_label()
    ));

    out.push_str("## Raw Data Table\n\n```\n");
    out.push_str(raw);
    out.push_str("\n```\n\n---\n\n");

    out.push_str("## AI Analysis & Audit\n\n");
    out.push_str(analysis);
    out.push_str("\n\n---\n\n");

    out.push_str("## Review\n\n");
    out.push_str(&review);
    out.push('\n');
    if let Some(feedback) = state
        .reflection_feedback
        .as_deref()
        .filter(|_| !state.analysis_approved)
    {
        out.push_str(&format!("\nLast reviewer feedback: {}\n", feedback));
    }

    out.push_str("\n---\n\n## About This Report\n\n");
    out.push_str(
        "This analysis was generated by an AI agent that:\n\
         1. Fetched the top Singapore REITs by market capitalization\n\
         2. Collected detailed financial metrics for each REIT\n\
         3. Ranked them by multiple performance indicators\n\
         4. Had the result reviewed by a second model before release\n\n",
    );
    out.push_str(&format!(
        "**Analysis Date:** {}\n\n",
        generated_at.format("%Y-%m-%d")
    ));
    out.push_str(
        "### Disclaimer\n\
         This report is for informational purposes only and should not be considered as financial advice.\n\
         Always conduct your own research and consult with a qualified financial advisor before making investment decisions.\n",
    );

    out
}
