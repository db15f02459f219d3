//! Core data models for the fund query pipeline
//!
//! Every value here is built once per request and never mutated afterwards.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AgentError;
use crate::Result;

/// Upper bound on funds in a single comparison
pub const MAX_COMPARE_FUNDS: usize = 5;

//
// ================= Question =================
//

/// Free-form question text, trimmed, non-empty and length-bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    text: String,
    truncated: bool,
}

impl Question {
    /// Builds a question, truncating (on a char boundary) beyond `max_chars`.
    pub fn new(text: &str, max_chars: usize) -> Result<Self> {
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Err(AgentError::AmbiguousIntent(
                "question is empty".to_string(),
            ));
        }

        let char_count = trimmed.chars().count();
        if char_count > max_chars {
            let cut: String = trimmed.chars().take(max_chars).collect();
            return Ok(Self {
                text: cut.trim_end().to_string(),
                truncated: true,
            });
        }

        Ok(Self {
            text: trimmed.to_string(),
            truncated: false,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn was_truncated(&self) -> bool {
        self.truncated
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

//
// ================= Fund references =================
//

/// Numeric AMFI scheme code (e.g. `119551`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemeCode(String);

impl SchemeCode {
    /// Accepts 5 to 6 ASCII digits after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = (5..=6).contains(&raw.len()) && raw.bytes().all(|b| b.is_ascii_digit());
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fund as the question names it: exact code or a free-text name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundRef {
    Code(SchemeCode),
    Name(String),
}

impl FundRef {
    /// Identity used for duplicate detection (names compare case-insensitively)
    pub fn key(&self) -> String {
        match self {
            FundRef::Code(code) => format!("code:{}", code),
            FundRef::Name(name) => format!(
                "name:{}",
                name.split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase()
            ),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            FundRef::Code(code) => code.as_str(),
            FundRef::Name(name) => name.as_str(),
        }
    }
}

/// Look-back window for NAV history and point-to-point returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HistoryWindow {
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[serde(rename = "1Y")]
    OneYear,
    #[serde(rename = "3Y")]
    ThreeYears,
    #[serde(rename = "5Y")]
    FiveYears,
}

impl HistoryWindow {
    pub const ALL: [HistoryWindow; 6] = [
        HistoryWindow::OneMonth,
        HistoryWindow::ThreeMonths,
        HistoryWindow::SixMonths,
        HistoryWindow::OneYear,
        HistoryWindow::ThreeYears,
        HistoryWindow::FiveYears,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            HistoryWindow::OneMonth => "1M",
            HistoryWindow::ThreeMonths => "3M",
            HistoryWindow::SixMonths => "6M",
            HistoryWindow::OneYear => "1Y",
            HistoryWindow::ThreeYears => "3Y",
            HistoryWindow::FiveYears => "5Y",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            HistoryWindow::OneMonth => 30,
            HistoryWindow::ThreeMonths => 91,
            HistoryWindow::SixMonths => 182,
            HistoryWindow::OneYear => 365,
            HistoryWindow::ThreeYears => 1095,
            HistoryWindow::FiveYears => 1825,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_uppercase();
        Self::ALL.into_iter().find(|w| w.label() == label)
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

//
// ================= Intent =================
//

/// Closed set of operations a question can resolve to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Intent {
    Search {
        term: String,
    },
    Lookup {
        fund: FundRef,
        window: Option<HistoryWindow>,
    },
    Compare {
        funds: Vec<FundRef>,
        window: Option<HistoryWindow>,
    },
}

impl Intent {
    pub fn search(term: &str) -> Result<Self> {
        let term = term.split_whitespace().collect::<Vec<_>>().join(" ");
        if term.is_empty() {
            return Err(AgentError::AmbiguousIntent(
                "search term is empty".to_string(),
            ));
        }
        Ok(Intent::Search { term })
    }

    pub fn lookup(fund: FundRef, window: Option<HistoryWindow>) -> Result<Self> {
        if fund.label().trim().is_empty() {
            return Err(AgentError::AmbiguousIntent(
                "lookup target is empty".to_string(),
            ));
        }
        Ok(Intent::Lookup { fund, window })
    }

    /// Drops duplicate funds (first occurrence wins) and requires at least two.
    pub fn compare(funds: Vec<FundRef>, window: Option<HistoryWindow>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        let mut unique: Vec<FundRef> = funds
            .into_iter()
            .filter(|f| !f.label().trim().is_empty())
            .filter(|f| seen.insert(f.key()))
            .collect();

        if unique.len() < 2 {
            return Err(AgentError::AmbiguousIntent(
                "comparison needs at least two distinct funds".to_string(),
            ));
        }

        unique.truncate(MAX_COMPARE_FUNDS);
        Ok(Intent::Compare {
            funds: unique,
            window,
        })
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Intent::Search { .. } => "search",
            Intent::Lookup { .. } => "lookup",
            Intent::Compare { .. } => "compare",
        }
    }
}

//
// ================= Tasks =================
//

/// Deterministic task identifier derived from the task's parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dispatch priority; lower runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    ExactCode,
    NameResolution,
    History,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// `getByCode` for an exact scheme code
    Lookup { code: SchemeCode },
    /// `searchByName` then `getByCode` of the best hit
    ResolveName { name: String },
    /// `searchByName` returning the match list
    Search { term: String },
    /// `getHistory`, best-effort
    History { code: SchemeCode, window: HistoryWindow },
}

impl TaskKind {
    pub fn priority(&self) -> TaskPriority {
        match self {
            TaskKind::Lookup { .. } => TaskPriority::ExactCode,
            TaskKind::ResolveName { .. } | TaskKind::Search { .. } => TaskPriority::NameResolution,
            TaskKind::History { .. } => TaskPriority::History,
        }
    }

    /// History is the only optional evidence
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, TaskKind::History { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: TaskPriority,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        let id = match &kind {
            TaskKind::Lookup { code } => format!("lookup:{}", code),
            TaskKind::ResolveName { name } => format!("resolve:{}", name.to_lowercase()),
            TaskKind::Search { term } => format!("search:{}", term.to_lowercase()),
            TaskKind::History { code, window } => format!("history:{}:{}", code, window),
        };

        Self {
            id: TaskId(id),
            priority: kind.priority(),
            kind,
        }
    }
}

//
// ================= Fund data =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundSummary {
    pub scheme_code: SchemeCode,
    pub scheme_name: String,
    pub fund_house: String,
    pub category: String,
}

/// Point-to-point returns in percent, rounded to 2 decimals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub one_month_return: Option<f64>,
    pub three_month_return: Option<f64>,
    pub six_month_return: Option<f64>,
    pub one_year_return: Option<f64>,
    pub three_year_return: Option<f64>,
    pub five_year_return: Option<f64>,
}

impl PerformanceMetrics {
    pub fn get(&self, window: HistoryWindow) -> Option<f64> {
        match window {
            HistoryWindow::OneMonth => self.one_month_return,
            HistoryWindow::ThreeMonths => self.three_month_return,
            HistoryWindow::SixMonths => self.six_month_return,
            HistoryWindow::OneYear => self.one_year_return,
            HistoryWindow::ThreeYears => self.three_year_return,
            HistoryWindow::FiveYears => self.five_year_return,
        }
    }

    pub fn set(&mut self, window: HistoryWindow, value: f64) {
        let slot = match window {
            HistoryWindow::OneMonth => &mut self.one_month_return,
            HistoryWindow::ThreeMonths => &mut self.three_month_return,
            HistoryWindow::SixMonths => &mut self.six_month_return,
            HistoryWindow::OneYear => &mut self.one_year_return,
            HistoryWindow::ThreeYears => &mut self.three_year_return,
            HistoryWindow::FiveYears => &mut self.five_year_return,
        };
        *slot = Some(value);
    }

    /// Windows with a computed return, shortest first
    pub fn available(&self) -> Vec<(HistoryWindow, f64)> {
        HistoryWindow::ALL
            .into_iter()
            .filter_map(|w| self.get(w).map(|v| (w, v)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundRecord {
    pub scheme_code: SchemeCode,
    pub scheme_name: String,
    pub fund_house: String,
    pub scheme_type: String,
    pub scheme_category: String,
    pub latest_nav: Option<f64>,
    pub nav_date: Option<NaiveDate>,
    pub performance: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub nav: f64,
}

//
// ================= Task results =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskOutput {
    Fund { record: FundRecord },
    Matches { funds: Vec<FundSummary> },
    History {
        code: SchemeCode,
        window: HistoryWindow,
        points: Vec<NavPoint>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TaskFailure {
    NotFound(String),
    Timeout,
    UpstreamError(String),
    /// Resolved to a scheme an earlier task already fetched
    Duplicate(SchemeCode),
}

impl From<crate::error::GatewayError> for TaskFailure {
    fn from(e: crate::error::GatewayError) -> Self {
        use crate::error::GatewayError;
        match e {
            GatewayError::NotFound(what) => TaskFailure::NotFound(what),
            GatewayError::Timeout => TaskFailure::Timeout,
            other => TaskFailure::UpstreamError(other.to_string()),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::NotFound(what) => write!(f, "not found ({})", what),
            TaskFailure::Timeout => f.write_str("timed out"),
            TaskFailure::UpstreamError(msg) => write!(f, "upstream error ({})", msg),
            TaskFailure::Duplicate(code) => write!(f, "same fund as scheme code {}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskResult {
    Success(TaskOutput),
    Failure(TaskFailure),
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }
}

//
// ================= Evidence =================
//

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceEntry {
    pub task: Task,
    pub result: TaskResult,
}

/// Terminal outcomes of every task of one request, in expansion order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceSet {
    intent: Intent,
    entries: Vec<EvidenceEntry>,
    completeness: bool,
}

impl EvidenceSet {
    /// Complete only if every task succeeded and a comparison has two
    /// distinct funds. A fund record for a scheme an earlier entry already
    /// holds is recorded as a `Duplicate` failure.
    pub fn assemble(intent: Intent, mut entries: Vec<EvidenceEntry>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for entry in entries.iter_mut() {
            let duplicate = match &entry.result {
                TaskResult::Success(TaskOutput::Fund { record }) => {
                    (!seen.insert(record.scheme_code.clone())).then(|| record.scheme_code.clone())
                }
                _ => None,
            };
            if let Some(code) = duplicate {
                entry.result = TaskResult::Failure(TaskFailure::Duplicate(code));
            }
        }

        let all_succeeded = entries.iter().all(|e| e.result.is_success());
        let fund_count = seen.len();

        let enough_funds = match &intent {
            Intent::Compare { .. } => fund_count >= 2,
            _ => true,
        };

        Self {
            completeness: all_succeeded && enough_funds && !entries.is_empty(),
            intent,
            entries,
        }
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    pub fn completeness(&self) -> bool {
        self.completeness
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskResult> {
        self.entries
            .iter()
            .find(|e| &e.task.id == id)
            .map(|e| &e.result)
    }

    /// Successfully fetched fund records, in task order
    pub fn fund_records(&self) -> Vec<&FundRecord> {
        self.entries
            .iter()
            .filter_map(|e| match &e.result {
                TaskResult::Success(TaskOutput::Fund { record }) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn search_matches(&self) -> Vec<&FundSummary> {
        self.entries
            .iter()
            .filter_map(|e| match &e.result {
                TaskResult::Success(TaskOutput::Matches { funds }) => Some(funds.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn histories(&self) -> Vec<(&SchemeCode, HistoryWindow, &[NavPoint])> {
        self.entries
            .iter()
            .filter_map(|e| match &e.result {
                TaskResult::Success(TaskOutput::History { code, window, points }) => {
                    Some((code, *window, points.as_slice()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(&Task, &TaskFailure)> {
        self.entries
            .iter()
            .filter_map(|e| match &e.result {
                TaskResult::Failure(failure) => Some((&e.task, failure)),
                _ => None,
            })
            .collect()
    }

    pub fn mandatory_success_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.task.kind.is_mandatory() && e.result.is_success())
            .count()
    }

    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_success()).count()
    }
}

//
// ================= Answer =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    /// Written by the reasoning service and grounding-checked
    Reasoning,
    /// Templated from evidence without the reasoning service
    Fallback,
}

/// Final response, carrying the evidence it was grounded on
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub request_id: Uuid,
    pub summary: String,
    pub evidence: EvidenceSet,
    pub completeness: bool,
    pub degraded: bool,
    pub confidence: f32,
    pub source: AnswerSource,
    pub generation_attempts: u8,
    pub evidence_fingerprint: String,
    pub reasoning_trace: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl Answer {
    pub fn new(
        request_id: Uuid,
        summary: String,
        evidence: EvidenceSet,
        source: AnswerSource,
        generation_attempts: u8,
        reasoning_trace: Vec<String>,
    ) -> Self {
        let completeness = evidence.completeness();
        let degraded = !completeness || source == AnswerSource::Fallback;

        let confidence = match (source, completeness) {
            (AnswerSource::Reasoning, true) => 0.9,
            (AnswerSource::Reasoning, false) => 0.6,
            (AnswerSource::Fallback, true) => 0.7,
            (AnswerSource::Fallback, false) => 0.4,
        };

        let evidence_fingerprint = crate::audit::compute_evidence_hash(&evidence);

        Self {
            request_id,
            summary,
            completeness,
            degraded,
            confidence,
            source,
            generation_attempts,
            evidence_fingerprint,
            reasoning_trace,
            generated_at: Utc::now(),
            evidence,
        }
    }
}
