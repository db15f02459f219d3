//! Prompt contract for answer synthesis
//!
//! The prompt carries only what the EvidenceSet holds. Failed tasks are
//! listed by what was requested and a coarse reason, never by upstream
//! error text.

use serde::Serialize;
use tracing::warn;

use crate::models::{
    EvidenceSet, FundRecord, FundSummary, HistoryWindow, NavPoint, Question, SchemeCode, Task,
    TaskFailure, TaskKind,
};
use crate::verification::GroundingViolation;

pub const SYNTHESIS_INSTRUCTION: &str = r#"You are a mutual fund data assistant for Indian mutual funds.

Guidelines:
- Answer the question using ONLY the evidence provided
- Copy NAVs, returns, dates and scheme codes exactly as they appear in the evidence
- Never calculate new figures (no differences, averages or projections)
- Mention every fund in the evidence by name
- If some requested data is listed as unavailable, say so plainly
- Do not recommend buying or selling
- Plain text, at most 200 words"#;

#[derive(Serialize)]
struct PromptEvidence<'a> {
    funds: Vec<&'a FundRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    search_matches: Vec<&'a FundSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    nav_history: Vec<HistoryDigest<'a>>,
}

/// First/last/low/high of a window instead of every point
#[derive(Serialize)]
struct HistoryDigest<'a> {
    scheme_code: &'a SchemeCode,
    window: HistoryWindow,
    start: &'a NavPoint,
    end: &'a NavPoint,
    lowest_nav: f64,
    highest_nav: f64,
}

fn digest<'a>(
    code: &'a SchemeCode,
    window: HistoryWindow,
    points: &'a [NavPoint],
) -> Option<HistoryDigest<'a>> {
    let start = points.first()?;
    let end = points.last()?;
    let lowest_nav = points.iter().map(|p| p.nav).fold(f64::INFINITY, f64::min);
    let highest_nav = points.iter().map(|p| p.nav).fold(f64::NEG_INFINITY, f64::max);

    Some(HistoryDigest {
        scheme_code: code,
        window,
        start,
        end,
        lowest_nav,
        highest_nav,
    })
}

/// Human label for what a task asked for
pub fn requested_label(task: &Task) -> String {
    match &task.kind {
        TaskKind::Lookup { code } => format!("scheme code {}", code),
        TaskKind::ResolveName { name } => format!("fund \"{}\"", name),
        TaskKind::Search { term } => format!("search for \"{}\"", term),
        TaskKind::History { code, window } => format!("{} NAV history of scheme code {}", window, code),
    }
}

pub fn failure_reason(failure: &TaskFailure) -> &'static str {
    match failure {
        TaskFailure::NotFound(_) => "not found",
        TaskFailure::Timeout => "timed out",
        TaskFailure::UpstreamError(_) => "data source unavailable",
        TaskFailure::Duplicate(_) => "same fund as another in the question",
    }
}

pub fn build_prompt(
    question: &Question,
    evidence: &EvidenceSet,
    correction: Option<&GroundingViolation>,
) -> String {
    let view = PromptEvidence {
        funds: evidence.fund_records(),
        search_matches: evidence.search_matches(),
        nav_history: evidence
            .histories()
            .into_iter()
            .filter_map(|(code, window, points)| digest(code, window, points))
            .collect(),
    };

    let evidence_json = serde_json::to_string_pretty(&view).unwrap_or_else(|e| {
        warn!(error = %e, "Evidence serialization failed");
        "{}".to_string()
    });

    let mut prompt = format!(
        "QUESTION:\n{}\n\nEVIDENCE:\n{}\n",
        question, evidence_json
    );

    let failures = evidence.failures();
    if !failures.is_empty() {
        prompt.push_str("\nUNAVAILABLE:\n");
        for (task, failure) in failures {
            prompt.push_str(&format!(
                "- {}: {}\n",
                requested_label(task),
                failure_reason(failure)
            ));
        }
    }

    if let Some(violation) = correction {
        prompt.push_str("\nCORRECTION:\n");
        prompt.push_str(&violation.corrective_instruction());
        prompt.push('\n');
    }

    prompt.push_str("\nWrite the answer.");
    prompt
}
