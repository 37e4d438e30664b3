//! Diagnostics report
//!
//! JSON document served by the API and the terminal rendering used by
//! `azdiag run`.

use serde::{Deserialize, Serialize};

use super::card::ResultCard;
use super::result::{DiagnosticResult, ResultSummary};

/// Report options
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Expand every card instead of truncating long content
    pub full: bool,
    /// JSON output
    pub json: bool,
}

/// Results of one run with the build id and summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub build_id: Option<String>,
    pub results: Vec<DiagnosticResult>,
    pub summary: ResultSummary,
}

impl DiagnosticsReport {
    pub fn new(results: Vec<DiagnosticResult>, build_id: Option<String>) -> Self {
        let summary = ResultSummary::from_results(&results);
        Self {
            build_id,
            results,
            summary,
        }
    }
}

/// Format a report for the terminal
pub fn format_report(report: &DiagnosticsReport, options: &ReportOptions) -> String {
    if options.json {
        return serde_json::to_string_pretty(report).unwrap_or_default();
    }

    let mut lines = Vec::new();

    lines.push("╭─────────────────────────────────────────────╮".to_string());
    lines.push("│                 Diagnostics                 │".to_string());
    lines.push("╰─────────────────────────────────────────────╯".to_string());
    lines.push(String::new());
    if let Some(ref build_id) = report.build_id {
        lines.push(format!("  Build Id: {}", build_id));
        lines.push(String::new());
    }
    lines.push("─────────────────────────────────────────────".to_string());
    lines.push(String::new());

    for result in &report.results {
        let mut card = ResultCard::new(result);
        if options.full {
            card.expand();
        }
        let icon = if card.is_success() { "✓" } else { "✗" };
        lines.push(format!("  {} {}", icon, card.name()));
        lines.push(format!("    {}", card.headline()));
        let content = card.displayed();
        if !content.is_empty() {
            for line in content.lines() {
                lines.push(format!("    └─ {}", line));
            }
        }
    }

    lines.push(String::new());
    lines.push("─────────────────────────────────────────────".to_string());
    lines.push(String::new());
    lines.push(format!(
        "  Summary: {} succeeded, {} failed",
        report.summary.succeeded, report.summary.failed
    ));
    lines.push(String::new());

    lines.join("\n")
}
