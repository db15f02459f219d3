//! Grounding verifier
//!
//! Rules-based check that generated answer text only states facts present
//! in the evidence it was built from. Deterministic, no reasoning service.
//!
//! The check is structured, not substring-based: every scheme code and
//! every numeric figure in the text is tokenized and matched against values
//! collected from the EvidenceSet.

use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{EvidenceSet, FundRecord, HistoryWindow, TaskKind};

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"\d+(?:,\d+)*(?:\.\d+)?").unwrap();
}

/// Never more precise than this when comparing figures
const MAX_DECIMALS: u32 = 6;

/// Words that make the number after them a reported figure
const FIGURE_WORDS: &[&str] = &[
    "return", "returns", "returned", "nav", "navs", "gained", "lost", "fell", "rose",
    "delivered", "yield", "yielded", "cagr",
];

/// Nouns a bare count may qualify ("2 funds")
const COUNT_NOUNS: &[&str] = &["fund", "funds", "scheme", "schemes"];

/// Generated text asserts something the evidence does not contain.
///
/// Recoverable: the synthesizer regenerates once, then falls back.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Grounding violation ({rule}): {}", .unsupported.join(", "))]
pub struct GroundingViolation {
    pub rule: &'static str,
    pub unsupported: Vec<String>,
}

impl GroundingViolation {
    /// Instruction appended to the prompt for the corrective attempt
    pub fn corrective_instruction(&self) -> String {
        format!(
            "Your previous answer mentioned {} which do not appear in the evidence. \
             Rewrite the answer using only scheme codes and figures copied exactly from the evidence. \
             Do not compute new numbers.",
            self.unsupported.join(", ")
        )
    }
}

/// How a number is used in the sentence around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberContext {
    /// `4%`, `returned 12`, `NAV of 80.45`
    Figure,
    /// A component of `15-01-2024`
    Date,
    /// `1Y`, `3M`, `3 years`, `12 months`
    Window,
    /// `1.` or `2)` opening a line
    ListMarker,
    /// `2 funds`
    Count,
    Plain,
}

/// A number as written in the text
#[derive(Debug, Clone, PartialEq)]
pub struct NumberToken {
    pub raw: String,
    pub value: f64,
    pub decimals: u32,
    pub context: NumberContext,
}

impl NumberToken {
    fn is_plain_integer(&self) -> bool {
        self.decimals == 0 && !self.raw.contains(',')
    }

    fn looks_like_scheme_code(&self) -> bool {
        self.is_plain_integer() && (5..=6).contains(&self.raw.len())
    }
}

pub fn tokenize_numbers(text: &str) -> Vec<NumberToken> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str();
            let cleaned = raw.replace(',', "");
            let value = cleaned.parse::<f64>().ok()?;
            let decimals = cleaned
                .split_once('.')
                .map(|(_, frac)| frac.len() as u32)
                .unwrap_or(0);
            let context = classify(&text[..m.start()], &text[m.end()..], value, decimals);
            Some(NumberToken {
                raw: raw.to_string(),
                value,
                decimals,
                context,
            })
        })
        .collect()
}

fn classify(before: &str, after: &str, value: f64, decimals: u32) -> NumberContext {
    if after.trim_start().starts_with('%') {
        return NumberContext::Figure;
    }
    if is_date_part(before, after) {
        return NumberContext::Date;
    }
    if decimals == 0 {
        if is_window(value as u32, after) {
            return NumberContext::Window;
        }
        if is_list_marker(before, after) {
            return NumberContext::ListMarker;
        }
        if COUNT_NOUNS.contains(&next_word(after).as_str()) {
            return NumberContext::Count;
        }
    }

    let figure_word = before
        .split_whitespace()
        .rev()
        .take(2)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .any(|w| FIGURE_WORDS.contains(&w.as_str()));
    if figure_word {
        NumberContext::Figure
    } else {
        NumberContext::Plain
    }
}

fn next_word(after: &str) -> String {
    after
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase()
}

fn is_date_part(before: &str, after: &str) -> bool {
    let joined_before = {
        let mut rev = before.chars().rev();
        matches!(rev.next(), Some('-') | Some('/'))
            && rev.next().map_or(false, |c| c.is_ascii_digit())
    };
    let joined_after = {
        let mut chars = after.chars();
        matches!(chars.next(), Some('-') | Some('/'))
            && chars.next().map_or(false, |c| c.is_ascii_digit())
    };
    joined_before || joined_after
}

fn is_window(n: u32, after: &str) -> bool {
    let mut chars = after.chars();
    let unit = match chars.next() {
        // `1Y`, `3m`
        Some(c @ ('M' | 'm' | 'Y' | 'y')) if !chars.next().map_or(false, |c| c.is_alphanumeric()) => {
            c.to_ascii_uppercase()
        }
        _ => match next_word(after).as_str() {
            "month" | "months" => 'M',
            "year" | "years" | "yr" | "yrs" => 'Y',
            _ => return false,
        },
    };

    (n == 12 && unit == 'M') || HistoryWindow::from_label(&format!("{}{}", n, unit)).is_some()
}

fn is_list_marker(before: &str, after: &str) -> bool {
    let line = before.rsplit('\n').next().unwrap_or("").trim();
    if !(line.is_empty() || line == "-" || line == "*") {
        return false;
    }
    let mut chars = after.chars();
    matches!(chars.next(), Some('.') | Some(')'))
        && chars.next().map_or(true, |c| c.is_whitespace())
}

// ===== Evidence facts =====

/// Values a grounded answer may cite
#[derive(Debug, Clone, Default)]
pub struct EvidenceFacts {
    codes: HashSet<String>,
    figures: Vec<f64>,
    calendar: Vec<f64>,
    task_count: usize,
    max_ordinal: usize,
}

impl EvidenceFacts {
    pub fn from_evidence(evidence: &EvidenceSet) -> Self {
        let task_count = evidence.entries().len();
        let mut facts = EvidenceFacts {
            task_count,
            max_ordinal: task_count.max(5),
            ..Default::default()
        };

        // what was asked for is citable even when it could not be fetched
        for entry in evidence.entries() {
            match &entry.task.kind {
                TaskKind::Lookup { code } | TaskKind::History { code, .. } => {
                    facts.codes.insert(code.to_string());
                }
                TaskKind::ResolveName { name } => facts.add_text(name),
                TaskKind::Search { term } => facts.add_text(term),
            }
        }

        for record in evidence.fund_records() {
            facts.add_record(record);
        }

        for summary in evidence.search_matches() {
            facts.codes.insert(summary.scheme_code.to_string());
            facts.add_text(&summary.scheme_name);
            facts.add_text(&summary.fund_house);
        }

        for (code, _, points) in evidence.histories() {
            facts.codes.insert(code.to_string());
            for point in points {
                facts.figures.push(point.nav);
                facts.add_date(point.date);
            }
        }

        facts
    }

    fn add_record(&mut self, record: &FundRecord) {
        self.codes.insert(record.scheme_code.to_string());
        self.add_text(&record.scheme_name);
        self.add_text(&record.fund_house);
        self.add_text(&record.scheme_category);
        self.add_text(&record.scheme_type);

        if let Some(nav) = record.latest_nav {
            self.figures.push(nav);
        }
        if let Some(date) = record.nav_date {
            self.add_date(date);
        }
        for (_, value) in record.performance.available() {
            self.figures.push(value);
        }
    }

    fn add_text(&mut self, text: &str) {
        self.figures
            .extend(tokenize_numbers(text).into_iter().map(|t| t.value));
    }

    fn add_date(&mut self, date: NaiveDate) {
        self.calendar.push(date.day() as f64);
        self.calendar.push(date.month() as f64);
        self.calendar.push(date.year() as f64);
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Whether the token may appear in a grounded answer.
    ///
    /// Ordinals, counts up to the task count and window labels need no
    /// evidence. Date parts must match an evidence date; a bare year may too.
    /// Everything else must equal an evidence value at the precision the
    /// text uses.
    pub fn supports(&self, token: &NumberToken) -> bool {
        let exempt = match token.context {
            NumberContext::Window => true,
            NumberContext::ListMarker => token.value <= self.max_ordinal as f64,
            NumberContext::Count => token.value >= 1.0 && token.value <= self.task_count as f64,
            NumberContext::Date => matches_any(&self.calendar, token),
            NumberContext::Plain => token.value >= 1900.0 && matches_any(&self.calendar, token),
            NumberContext::Figure => false,
        };

        exempt || matches_any(&self.figures, token)
    }
}

/// Equal to some value at the precision the token uses
fn matches_any(values: &[f64], token: &NumberToken) -> bool {
    let decimals = token.decimals.min(MAX_DECIMALS);
    let scale = 10f64.powi(decimals as i32);
    let wanted = (token.value * scale).round();

    values.iter().any(|n| (n.abs() * scale).round() == wanted)
}

// ===== Rules =====

pub trait GroundingRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Items in `text` this rule cannot find support for
    fn unsupported(&self, text: &str, facts: &EvidenceFacts) -> Vec<String>;
}

/// Rule: answer text must not be blank
pub struct NonEmptyAnswerRule;

impl GroundingRule for NonEmptyAnswerRule {
    fn name(&self) -> &'static str {
        "non_empty_answer"
    }

    fn unsupported(&self, text: &str, _facts: &EvidenceFacts) -> Vec<String> {
        if text.trim().is_empty() {
            vec!["an empty answer".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Rule: every 5-6 digit code must be an evidence scheme code
pub struct SchemeCodeRule;

impl GroundingRule for SchemeCodeRule {
    fn name(&self) -> &'static str {
        "scheme_code"
    }

    fn unsupported(&self, text: &str, facts: &EvidenceFacts) -> Vec<String> {
        tokenize_numbers(text)
            .into_iter()
            .filter(|t| t.looks_like_scheme_code())
            .filter(|t| !facts.has_code(&t.raw) && !facts.supports(t))
            .map(|t| format!("scheme code {}", t.raw))
            .collect()
    }
}

/// Rule: every other figure must match an evidence value
pub struct NumericFigureRule;

impl GroundingRule for NumericFigureRule {
    fn name(&self) -> &'static str {
        "numeric_figure"
    }

    fn unsupported(&self, text: &str, facts: &EvidenceFacts) -> Vec<String> {
        tokenize_numbers(text)
            .into_iter()
            .filter(|t| !t.looks_like_scheme_code())
            .filter(|t| !facts.supports(t))
            .map(|t| format!("figure {}", t.raw))
            .collect()
    }
}

/// Runs every rule; the first failing rule is reported
pub struct GroundingVerifier {
    rules: Vec<Box<dyn GroundingRule>>,
}

impl GroundingVerifier {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn GroundingRule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, text: &str, evidence: &EvidenceSet) -> Result<(), GroundingViolation> {
        let facts = EvidenceFacts::from_evidence(evidence);
        self.verify_with(text, &facts)
    }

    pub fn verify_with(&self, text: &str, facts: &EvidenceFacts) -> Result<(), GroundingViolation> {
        for rule in &self.rules {
            let mut unsupported = rule.unsupported(text, facts);
            if !unsupported.is_empty() {
                unsupported.dedup();
                debug!(rule = rule.name(), ?unsupported, "Grounding rule failed");
                return Err(GroundingViolation {
                    rule: rule.name(),
                    unsupported,
                });
            }
        }

        info!(rule_count = self.rules.len(), "Grounding verified");
        Ok(())
    }
}

impl Default for GroundingVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a verifier with the standard rules
pub fn create_default_grounding_verifier() -> GroundingVerifier {
    let mut verifier = GroundingVerifier::new();
    verifier.add_rule(Box::new(NonEmptyAnswerRule));
    verifier.add_rule(Box::new(SchemeCodeRule));
    verifier.add_rule(Box::new(NumericFigureRule));
    verifier
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EvidenceEntry, FundRef, Intent, PerformanceMetrics, SchemeCode, Task, TaskFailure,
        TaskOutput, TaskResult,
    };

    fn evidence() -> EvidenceSet {
        let code = SchemeCode::parse("119598").unwrap();
        let mut performance = PerformanceMetrics::default();
        performance.set(HistoryWindow::OneYear, 25.0);
        performance.set(HistoryWindow::ThreeMonths, -3.14);

        let record = FundRecord {
            scheme_code: code.clone(),
            scheme_name: "SBI Bluechip Fund - Direct Plan - Growth".into(),
            fund_house: "SBI Mutual Fund".into(),
            scheme_type: "Open Ended Schemes".into(),
            scheme_category: "Equity Scheme - Large Cap Fund".into(),
            latest_nav: Some(80.4567),
            nav_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            performance,
        };

        EvidenceSet::assemble(
            Intent::lookup(FundRef::Code(code.clone()), None).unwrap(),
            vec![EvidenceEntry {
                task: Task::new(TaskKind::Lookup { code }),
                result: TaskResult::Success(TaskOutput::Fund { record }),
            }],
        )
    }

    #[test]
    fn test_tokenize_numbers() {
        let tokens = tokenize_numbers("NAV 1,234.50 on 15-01-2024, up 5%");
        let raws: Vec<&str> = tokens.iter().map(|t| t.raw.as_str()).collect();
        assert_eq!(raws, vec!["1,234.50", "15", "01", "2024", "5"]);
        assert_eq!(tokens[0].value, 1234.5);
        assert_eq!(tokens[0].decimals, 2);
    }

    #[test]
    fn test_grounded_text_passes() {
        let verifier = create_default_grounding_verifier();
        let text = "SBI Bluechip Fund (119598) closed at a NAV of 80.46 on 15-01-2024. \
                    Its 1Y return was 25.00% and its 3M return was -3.1%.";
        assert!(verifier.verify(text, &evidence()).is_ok());
    }

    #[test]
    fn test_unseen_code_rejected() {
        let verifier = create_default_grounding_verifier();
        let violation = verifier
            .verify("Consider 120586 instead of 119598.", &evidence())
            .unwrap_err();
        assert_eq!(violation.rule, "scheme_code");
        assert_eq!(violation.unsupported, vec!["scheme code 120586"]);
        assert!(violation.corrective_instruction().contains("120586"));
    }

    #[test]
    fn test_invented_figure_rejected() {
        let verifier = create_default_grounding_verifier();
        let violation = verifier
            .verify("The fund returned 31.7% over 1Y.", &evidence())
            .unwrap_err();
        assert_eq!(violation.rule, "numeric_figure");

        assert!(verifier.verify("It holds 47 stocks.", &evidence()).is_err());
    }

    #[test]
    fn test_small_invented_percentages_rejected() {
        let verifier = create_default_grounding_verifier();

        for text in [
            "SBI Bluechip Fund returned 4% over 3Y.",
            "SBI Bluechip Fund returned 12% over 5Y.",
            "Its return was 3 percent.",
            "The NAV rose to 5.",
            "Both 2 funds are large cap.",
        ] {
            let violation = verifier.verify(text, &evidence()).unwrap_err();
            assert_eq!(violation.rule, "numeric_figure", "{}", text);
        }
    }

    #[test]
    fn test_ordinals_and_windows_allowed() {
        let verifier = create_default_grounding_verifier();
        let text = "1. SBI Bluechip Fund is a large cap fund.\n\
                    2) Over 3 years and 12 months, see the 1Y return of 25%.\n\
                    - 3. It is 1 fund from SBI, priced on 15/01/2024.";
        assert!(verifier.verify(text, &evidence()).is_ok());
    }

    #[test]
    fn test_number_context() {
        let contexts: Vec<NumberContext> = tokenize_numbers("1. NAV of 80.46 on 15-01-2024, 3Y, 2 funds, 7")
            .iter()
            .map(|t| t.context)
            .collect();
        assert_eq!(
            contexts,
            vec![
                NumberContext::ListMarker,
                NumberContext::Figure,
                NumberContext::Date,
                NumberContext::Date,
                NumberContext::Date,
                NumberContext::Window,
                NumberContext::Count,
                NumberContext::Plain,
            ]
        );
    }

    #[test]
    fn test_failed_task_parameters_are_citable() {
        let code = SchemeCode::parse("120586").unwrap();
        let evidence = EvidenceSet::assemble(
            Intent::lookup(FundRef::Name("HDFC Top 100".into()), None).unwrap(),
            vec![
                EvidenceEntry {
                    task: Task::new(TaskKind::ResolveName {
                        name: "HDFC Top 100".into(),
                    }),
                    result: TaskResult::Failure(TaskFailure::Timeout),
                },
                EvidenceEntry {
                    task: Task::new(TaskKind::Lookup { code }),
                    result: TaskResult::Failure(TaskFailure::NotFound("120586".into())),
                },
            ],
        );

        let verifier = create_default_grounding_verifier();
        assert!(verifier
            .verify("HDFC Top 100 and 120586 could not be retrieved.", &evidence)
            .is_ok());
        assert!(verifier.verify("Try 120587 instead.", &evidence).is_err());
    }

    #[test]
    fn test_empty_answer_rejected() {
        let verifier = create_default_grounding_verifier();
        let violation = verifier.verify("   ", &evidence()).unwrap_err();
        assert_eq!(violation.rule, "non_empty_answer");
    }
}
