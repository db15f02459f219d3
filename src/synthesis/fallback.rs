//! Evidence-only answer template
//!
//! Degraded-mode terminal behavior: renders the EvidenceSet directly,
//! without the reasoning service. Never fails and never derives a figure
//! that is not already in the evidence.

use chrono::NaiveDate;

use crate::models::{EvidenceSet, FundRecord, FundSummary, HistoryWindow, Intent, NavPoint, SchemeCode};

use super::prompt::{failure_reason, requested_label};

fn format_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

fn format_record(record: &FundRecord) -> String {
    let mut line = format!("- {} (scheme code {})", record.scheme_name, record.scheme_code);

    let mut meta: Vec<&str> = Vec::new();
    if !record.fund_house.is_empty() {
        meta.push(&record.fund_house);
    }
    if !record.scheme_category.is_empty() {
        meta.push(&record.scheme_category);
    }
    if !meta.is_empty() {
        line.push_str(&format!(", {}", meta.join(", ")));
    }

    match (record.latest_nav, record.nav_date) {
        (Some(nav), Some(date)) => {
            line.push_str(&format!(". NAV {:.4} as of {}", nav, format_date(date)))
        }
        (Some(nav), None) => line.push_str(&format!(". NAV {:.4}", nav)),
        _ => line.push_str(". NAV not available"),
    }

    let returns = record.performance.available();
    if !returns.is_empty() {
        let parts: Vec<String> = returns
            .iter()
            .map(|(window, value)| format!("{} {:+.2}%", window, value))
            .collect();
        line.push_str(&format!(". Returns: {}", parts.join(", ")));
    }

    line.push('.');
    line
}

fn format_match(summary: &FundSummary) -> String {
    let mut line = format!("- {} (scheme code {})", summary.scheme_name, summary.scheme_code);
    if !summary.fund_house.is_empty() {
        line.push_str(&format!(", {}", summary.fund_house));
    }
    if !summary.category.is_empty() {
        line.push_str(&format!(", {}", summary.category));
    }
    line
}

fn format_history(code: &SchemeCode, window: HistoryWindow, points: &[NavPoint]) -> Option<String> {
    let start = points.first()?;
    let end = points.last()?;
    Some(format!(
        "- Scheme code {} over {}: NAV {:.4} on {} to {:.4} on {}.",
        code,
        window,
        start.nav,
        format_date(start.date),
        end.nav,
        format_date(end.date)
    ))
}

/// Templated factual summary of everything the evidence holds
pub fn render(evidence: &EvidenceSet) -> String {
    let mut sections: Vec<String> = Vec::new();

    let records = evidence.fund_records();
    if !records.is_empty() {
        let heading = match evidence.intent() {
            Intent::Compare { .. } => "Side-by-side fund data:",
            _ => "Fund data:",
        };
        let lines: Vec<String> = records.iter().map(|r| format_record(r)).collect();
        sections.push(format!("{}\n{}", heading, lines.join("\n")));
    }

    let matches = evidence.search_matches();
    if !matches.is_empty() {
        let lines: Vec<String> = matches.iter().map(|m| format_match(m)).collect();
        sections.push(format!("Matching funds:\n{}", lines.join("\n")));
    }

    let histories: Vec<String> = evidence
        .histories()
        .into_iter()
        .filter_map(|(code, window, points)| format_history(code, window, points))
        .collect();
    if !histories.is_empty() {
        sections.push(format!("NAV history:\n{}", histories.join("\n")));
    }

    let failures = evidence.failures();
    if !failures.is_empty() {
        let lines: Vec<String> = failures
            .iter()
            .map(|(task, failure)| format!("- {}: {}", requested_label(task), failure_reason(failure)))
            .collect();
        sections.push(format!("Unavailable:\n{}", lines.join("\n")));
    }

    if sections.is_empty() {
        return "No fund data was available for this question.".to_string();
    }

    sections.join("\n\n")
}
