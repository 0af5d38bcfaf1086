//! Singapore REIT tools
//!
//! The market-data service returns structured metrics; these tools turn them
//! into the text tables the analyst model reads.

use crate::error::WorkflowError;
use crate::tools::{require_api, require_str, FinancialApiClient, Tool};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt::Write;
use tracing::{debug, info};

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 50;
const SEARCH_RESULTS_PER_QUERY: u32 = 3;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DividendRecord {
    pub year: i32,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, rename = "yield")]
    pub dividend_yield: f64,
}

/// Metrics for one REIT as returned by the service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReitMetrics {
    pub ticker: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub price_to_book: Option<f64>,
    #[serde(default)]
    pub current_year_dividend_yield: Option<f64>,
    #[serde(default)]
    pub ytd_performance: Option<f64>,
    #[serde(default)]
    pub gearing_ratio: Option<f64>,
    #[serde(default)]
    pub icr: Option<f64>,
    /// Newest year first.
    #[serde(default)]
    pub dividend_history: Vec<DividendRecord>,
}

impl ReitMetrics {
    fn company(&self) -> &str {
        self.company_name.as_deref().unwrap_or("N/A")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
}

fn or_na(value: Option<f64>, render: impl Fn(f64) -> String) -> String {
    value.map(render).unwrap_or_else(|| "N/A".to_string())
}

fn signed_pct(value: f64, precision: usize) -> String {
    let sign = if value >= 0.0 { "+" } else { "" };
    format!("{}{:.*}%", sign, precision, value)
}

/// Compound annual DPU growth between the oldest and newest records.
pub fn dpu_cagr(history: &[DividendRecord]) -> Option<f64> {
    let newest = history.first()?;
    let oldest = history.last()?;
    let years = newest.year - oldest.year;

    if years <= 0 || oldest.amount <= 0.0 || newest.amount <= 0.0 {
        return None;
    }

    Some(((newest.amount / oldest.amount).powf(1.0 / years as f64) - 1.0) * 100.0)
}

/// Ranked table plus per-REIT dividend history.
pub fn format_rankings(reits: &[ReitMetrics]) -> String {
    let rule = "=".repeat(127);
    let mut out = String::new();

    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(
        out,
        "TOP {} SINGAPORE REITs - COMPREHENSIVE ANALYSIS (Sorted by Market Cap)",
        reits.len()
    );
    let _ = writeln!(out, "{}\n", rule);
    let _ = writeln!(
        out,
        "{:<6}{:<12}{:<35}{:<12}{:<9}{:<7}{:<8}{:<10}{:<8}{:<7}",
        "Rank", "Ticker", "Company Name", "Mkt Cap", "Price", "P/B", "Yield", "YTD", "Gearing", "ICR"
    );
    let _ = writeln!(out, "{}", "-".repeat(127));

    for (i, reit) in reits.iter().enumerate() {
        let company: String = reit.company().chars().take(32).collect();
        let _ = writeln!(
            out,
            "{:<6}{:<12}{:<35}{:<12}{:<9}{:<7}{:<8}{:<10}{:<8}{:<7}",
            i + 1,
            reit.ticker,
            company,
            or_na(reit.market_cap, |v| format!("${:.2}B", v / 1e9)),
            or_na(reit.current_price, |v| format!("${:.2}", v)),
            or_na(reit.price_to_book, |v| format!("{:.2}", v)),
            or_na(reit.current_year_dividend_yield, |v| format!("{:.2}%", v)),
            or_na(reit.ytd_performance, |v| signed_pct(v, 2)),
            or_na(reit.gearing_ratio, |v| format!("{:.2}", v)),
            or_na(reit.icr, |v| format!("{:.2}x", v)),
        );
    }

    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "\n\nDPU TRENDS & DIVIDEND HISTORY");
    let _ = writeln!(out, "{}\n", "=".repeat(80));

    for reit in reits {
        let _ = writeln!(out, "--- {} ({}) ---", reit.ticker, reit.company());

        if reit.dividend_history.is_empty() {
            let _ = writeln!(out, "  No dividend history available");
        } else {
            for div in &reit.dividend_history {
                let _ = writeln!(
                    out,
                    "  {}: {:.2}¢ (yield {:.2}%)",
                    div.year,
                    div.amount * 100.0,
                    div.dividend_yield
                );
            }
            if let Some(cagr) = dpu_cagr(&reit.dividend_history) {
                let years = reit.dividend_history[0].year
                    - reit.dividend_history[reit.dividend_history.len() - 1].year;
                let _ = writeln!(out, "  {}-Year DPU CAGR: {}", years, signed_pct(cagr, 1));
            }
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{}", "=".repeat(80));
    out
}

pub fn format_reit_info(reit: &ReitMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", reit.ticker, reit.company());
    let _ = writeln!(out, "Current Price: {}", or_na(reit.current_price, |v| format!("${:.2}", v)));
    let _ = writeln!(out, "Market Cap: {}", or_na(reit.market_cap, |v| format!("${:.2}B", v / 1e9)));
    let _ = writeln!(out, "Price-to-Book: {}", or_na(reit.price_to_book, |v| format!("{:.2}", v)));
    let _ = writeln!(
        out,
        "Dividend Yield (current year): {}",
        or_na(reit.current_year_dividend_yield, |v| format!("{:.2}%", v))
    );
    let _ = writeln!(out, "YTD Performance: {}", or_na(reit.ytd_performance, |v| signed_pct(v, 2)));
    let _ = writeln!(out, "Gearing Ratio: {}", or_na(reit.gearing_ratio, |v| format!("{:.2}", v)));
    let _ = writeln!(out, "Interest Coverage: {}", or_na(reit.icr, |v| format!("{:.2}x", v)));

    if !reit.dividend_history.is_empty() {
        let _ = writeln!(out, "Dividend History:");
        for div in &reit.dividend_history {
            let _ = writeln!(
                out,
                "  {}: {:.4} (yield {:.2}%)",
                div.year, div.amount, div.dividend_yield
            );
        }
    }
    out
}

/// Search hits deduplicated by title.
pub fn format_search_results(ticker: &str, company_name: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No web search results found for {} ({})", company_name, ticker);
    }

    let rule = "=".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "WEB SEARCH RESULTS: {} ({})", company_name, ticker);
    let _ = writeln!(out, "{}\n", rule);

    let mut seen: HashSet<&str> = HashSet::new();
    for result in results {
        let title = result.title.as_deref().unwrap_or("No title");
        if !seen.insert(title) {
            continue;
        }
        let _ = writeln!(out, "[{}] {}", seen.len(), title);
        let _ = writeln!(out, "    {}", result.body.as_deref().unwrap_or("No description"));
        let _ = writeln!(out, "    Source: {}\n", result.href.as_deref().unwrap_or(""));
    }

    let _ = writeln!(out, "{}", rule);
    out.push_str("\nUse this information to provide deeper qualitative analysis about:\n");
    out.push_str("- Tenant quality and lease profiles\n");
    out.push_str("- Asset locations and property grades\n");
    out.push_str("- Recent corporate actions and news\n");
    out.push_str("- Sponsor support and pipeline\n");
    out
}

fn parse_limit(args: &Map<String, Value>) -> Result<u64> {
    match args.get("limit") {
        None | Some(Value::Null) => Ok(DEFAULT_LIMIT),
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .filter(|n| (1..=MAX_LIMIT).contains(n))
            .ok_or_else(|| {
                WorkflowError::InvalidToolInput(format!(
                    "'limit' must be an integer between 1 and {}",
                    MAX_LIMIT
                ))
            }),
    }
}

//
// ================= Tools =================
//

pub struct GetReitInfoTool {
    api: Option<FinancialApiClient>,
}

impl GetReitInfoTool {
    pub fn new(api: Option<FinancialApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for GetReitInfoTool {
    fn name(&self) -> &'static str {
        "get_reit_info"
    }

    fn description(&self) -> &'static str {
        "Fetches current price, market cap, price-to-book, dividend yield history, \
         YTD performance, gearing and interest coverage for one Singapore REIT ticker \
         (e.g. 'C38U.SI')."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string", "description": "Yahoo Finance ticker, e.g. C38U.SI"}
            },
            "required": ["ticker"]
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;

        debug!(ticker, "Fetching REIT info");
        let response = api
            .post_json("/api/v1/reits/info", &json!({ "ticker": ticker }))
            .await?;

        let reit: ReitMetrics = serde_json::from_value(response)
            .map_err(|e| WorkflowError::ToolError(format!("Unexpected REIT payload: {}", e)))?;

        Ok(format_reit_info(&reit))
    }
}

pub struct AnalyzeTopReitsTool {
    api: Option<FinancialApiClient>,
}

impl AnalyzeTopReitsTool {
    pub fn new(api: Option<FinancialApiClient>) -> Self {
        Self { api }
    }
}

#[derive(Deserialize)]
struct TopReitsResponse {
    #[serde(default)]
    reits: Vec<ReitMetrics>,
}

#[async_trait::async_trait]
impl Tool for AnalyzeTopReitsTool {
    fn name(&self) -> &'static str {
        "analyze_top_singapore_reits"
    }

    fn description(&self) -> &'static str {
        "Finds the top Singapore REITs by market capitalization, fetches detailed data \
         for each and ranks them by price-to-book, dividend yield, YTD performance and \
         gearing, including DPU trends."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "description": "Number of REITs to analyze (default 20)"}
            }
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let api = require_api(&self.api)?;
        let limit = parse_limit(args)?;

        info!(limit, "Analyzing top Singapore REITs");
        let response = api
            .post_json("/api/v1/reits/top", &json!({ "limit": limit }))
            .await?;

        let top: TopReitsResponse = serde_json::from_value(response)
            .map_err(|e| WorkflowError::ToolError(format!("Unexpected ranking payload: {}", e)))?;

        if top.reits.is_empty() {
            return Err(WorkflowError::ToolError(
                "Unable to fetch Singapore REIT data".to_string(),
            ));
        }

        Ok(format_rankings(&top.reits))
    }
}

pub struct SearchReitQualitativeInfoTool {
    api: Option<FinancialApiClient>,
}

impl SearchReitQualitativeInfoTool {
    pub fn new(api: Option<FinancialApiClient>) -> Self {
        Self { api }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[async_trait::async_trait]
impl Tool for SearchReitQualitativeInfoTool {
    fn name(&self) -> &'static str {
        "search_reit_qualitative_info"
    }

    fn description(&self) -> &'static str {
        "Searches the web for qualitative information about a Singapore REIT: top \
         tenants, key assets, recent acquisitions or results, sponsor and pipeline, \
         analyst commentary."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string", "description": "REIT ticker, e.g. C38U.SI"},
                "company_name": {"type": "string", "description": "Full REIT name"}
            },
            "required": ["ticker", "company_name"]
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let api = require_api(&self.api)?;
        let ticker = require_str(args, "ticker")?;
        let company_name = require_str(args, "company_name")?;

        let queries = [
            format!("\"{}\" REIT top tenants portfolio", company_name),
            format!("\"{}\" REIT news acquisitions", company_name),
            format!("\"{}\" REIT quarterly results DPU", company_name),
        ];

        info!(ticker, company_name, "Searching qualitative REIT info");
        let response = api
            .post_json(
                "/api/v1/search",
                &json!({ "queries": queries, "max_results": SEARCH_RESULTS_PER_QUERY }),
            )
            .await?;

        let search: SearchResponse = serde_json::from_value(response)
            .map_err(|e| WorkflowError::ToolError(format!("Unexpected search payload: {}", e)))?;

        Ok(format_search_results(ticker, company_name, &search.results))
    }
}
