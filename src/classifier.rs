//! Question Classifier
//!
//! Lightweight entity extraction over the raw question text:
//! - scheme codes (5-6 digit numbers)
//! - comparison / search / lookup / transaction keywords
//! - fund names between separators ("vs", "with", "and", ...)
//! - look-back windows ("3 years", "6M", ...)
//!
//! Produces an `Intent` when the signals are unambiguous and reports
//! `Unclear` otherwise, so the resolver can decide whether to ask the
//! reasoning service.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{FundRef, HistoryWindow, Intent, SchemeCode};

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Resolved(Intent),
    /// Question asks for an operation outside search/lookup/compare
    Unsupported(String),
    /// No confident mapping; `domain_signal` says whether it is about funds at all
    Unclear { domain_signal: bool },
}

/// AMC names, longest first so "Aditya Birla" wins over shorter overlaps
pub const FUND_HOUSES: &[&str] = &[
    "Aditya Birla", "Parag Parikh", "Franklin", "Edelweiss", "Motilal", "Invesco",
    "Nippon", "Canara", "Mirae", "Kotak", "ICICI", "Axis", "HDFC", "IDFC", "Tata",
    "L&T", "SBI", "DSP", "UTI",
];

const DOMAIN_KEYWORDS: &[&str] = &[
    "fund", "mutual", "scheme", "nav", "amc", "sip", "elss", "bluechip", "cap",
    "equity", "debt", "hybrid", "index", "returns", "return", "nifty", "sensex",
    "liquid", "gilt", "flexi",
];

lazy_static! {
    static ref CODE_RE: Regex = Regex::new(r"\b(\d{5,6})\b").unwrap();

    static ref COMPARISON_RE: Regex = Regex::new(
        r"(?i)\b(compare|comparison|versus|vs\.?|better than|difference between|differences between|which is better)(\s|$|\b)"
    ).unwrap();

    static ref UNSUPPORTED_RE: Regex = Regex::new(
        r"(?i)\b(buy|sell|purchase|redeem|redemption|invest in|start an? sip|switch|transfer|rebalance|my portfolio)\b"
    ).unwrap();

    static ref SEARCH_RE: Regex = Regex::new(
        r"(?i)\b(search for|search|find|list|show me|look for|which funds|suggest|best)\b"
    ).unwrap();

    static ref LOOKUP_RE: Regex = Regex::new(
        r"(?i)\b(tell me about|details of|details for|details on|information on|information about|info on|info about|nav of|nav for|performance of|returns of|returns for|how is|how has|how did|what about)\b"
    ).unwrap();

    static ref WINDOW_RE: Regex = Regex::new(
        r"(?i)\b(\d{1,2}|one|three|six|five|twelve)\s*-?\s*(months?|mo|m|years?|yrs?|y)\b"
    ).unwrap();

    static ref PAIR_SPLIT_RE: Regex = Regex::new(
        r"(?i)\s+(?:vs\.?|versus|with|against|to|better than)\s+"
    ).unwrap();

    static ref LIST_SPLIT_RE: Regex = Regex::new(
        r"(?i)\s+(?:and|or)\s+|\s*,\s*"
    ).unwrap();

    static ref COMMA_SPLIT_RE: Regex = Regex::new(r"\s*,\s*").unwrap();

    static ref LEADING_FILLER_RE: Regex = Regex::new(
        r"(?i)^(please\s+|can you\s+|could you\s+|kindly\s+|i want to\s+|help me\s+)*(compare|comparison of|comparison between|difference between|differences between|which is better[:,]?|is|between|the)?\s+"
    ).unwrap();

    static ref TRAILING_FILLER_RE: Regex = Regex::new(
        r"(?i)(\s+(over|for|in|during|across|since)(\s+the)?(\s+(last|past))?)?\s*[?.!]*\s*$"
    ).unwrap();

    static ref NAME_SUFFIX_RE: Regex = Regex::new(
        r"(?i)(\s+(mutual\s+)?funds?|\s+schemes?|\s+performing|\s+doing|\s+done|\s+performed|\s+nav|\s+returns?)+\s*$"
    ).unwrap();
}

pub struct QuestionClassifier;

impl QuestionClassifier {
    pub fn classify(question: &str) -> Classification {
        let text = question.trim();
        let window = extract_window(text);

        if let Some(op) = UNSUPPORTED_RE.find(text) {
            return Classification::Unsupported(op.as_str().to_lowercase());
        }

        let codes = extract_scheme_codes(text);
        let comparison = is_comparison(text);

        // Codes first: an exact code always beats a name for the same target.
        if codes.len() >= 2 {
            let funds = codes.iter().cloned().map(FundRef::Code).collect();
            if let Ok(intent) = Intent::compare(funds, window) {
                return Classification::Resolved(intent);
            }
        }

        if comparison {
            let funds = split_fund_refs(text);
            if let Ok(intent) = Intent::compare(funds, window) {
                return Classification::Resolved(intent);
            }
        }

        if let Some(code) = codes.into_iter().next() {
            if let Ok(intent) = Intent::lookup(FundRef::Code(code), window) {
                return Classification::Resolved(intent);
            }
        }

        if let Some(found) = LOOKUP_RE.find(text) {
            let name = clean_name(&text[found.end()..]);
            if is_meaningful_name(&name) {
                if let Ok(intent) = Intent::lookup(FundRef::Name(name), window) {
                    return Classification::Resolved(intent);
                }
            }
        }

        if let Some(found) = SEARCH_RE.find(text) {
            let term = search_term(&text[found.end()..]);
            if !term.is_empty() {
                if let Ok(intent) = Intent::search(&term) {
                    return Classification::Resolved(intent);
                }
            }
        }

        Classification::Unclear {
            domain_signal: has_domain_signal(text),
        }
    }
}

/// Distinct scheme codes in order of appearance
pub fn extract_scheme_codes(text: &str) -> Vec<SchemeCode> {
    let mut codes: Vec<SchemeCode> = Vec::new();
    for caps in CODE_RE.captures_iter(text) {
        if let Some(code) = caps.get(1).and_then(|m| SchemeCode::parse(m.as_str())) {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }
    codes
}

pub fn is_comparison(text: &str) -> bool {
    COMPARISON_RE.is_match(text)
}

/// First recognisable look-back window in the text
pub fn extract_window(text: &str) -> Option<HistoryWindow> {
    WINDOW_RE.captures_iter(text).find_map(|caps| {
        let amount = match caps.get(1)?.as_str().to_lowercase().as_str() {
            "one" => 1,
            "three" => 3,
            "five" => 5,
            "six" => 6,
            "twelve" => 12,
            digits => digits.parse::<u32>().ok()?,
        };
        let unit = caps.get(2)?.as_str().to_lowercase();
        let is_month = unit.starts_with('m');

        match (is_month, amount) {
            (true, 1) => Some(HistoryWindow::OneMonth),
            (true, 3) => Some(HistoryWindow::ThreeMonths),
            (true, 6) => Some(HistoryWindow::SixMonths),
            (true, 12) | (false, 1) => Some(HistoryWindow::OneYear),
            (false, 3) => Some(HistoryWindow::ThreeYears),
            (false, 5) => Some(HistoryWindow::FiveYears),
            _ => None,
        }
    })
}

pub fn has_domain_signal(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '&')
        .filter(|w| !w.is_empty())
        .collect();

    DOMAIN_KEYWORDS.iter().any(|kw| words.contains(kw))
        || FUND_HOUSES
            .iter()
            .any(|house| lowered.contains(&house.to_lowercase()))
}

/// Known AMC mentioned in a scheme name, or empty
pub fn infer_fund_house(scheme_name: &str) -> String {
    let lowered = scheme_name.to_lowercase();
    FUND_HOUSES
        .iter()
        .find(|house| lowered.contains(&house.to_lowercase()))
        .map(|house| house.to_string())
        .unwrap_or_default()
}

/// Splits a comparison question into per-fund references.
///
/// Pair separators ("vs", "with", "better than") win when present, so
/// "and" inside a scheme name ("Banking and Financial Services") is kept;
/// "and"/"or" split only questions that have no pair separator.
/// A segment containing a scheme code becomes that code; otherwise the
/// cleaned segment text becomes a name.
pub fn split_fund_refs(text: &str) -> Vec<FundRef> {
    let without_window = WINDOW_RE.replace_all(text, " ");
    let body = strip_leading_filler(without_window.trim());
    let body = TRAILING_FILLER_RE.replace(&body, "").to_string();

    let segments: Vec<&str> = if PAIR_SPLIT_RE.is_match(&body) {
        PAIR_SPLIT_RE
            .split(&body)
            .flat_map(|part| COMMA_SPLIT_RE.split(part))
            .collect()
    } else {
        LIST_SPLIT_RE.split(&body).collect()
    };

    segments
        .into_iter()
        .filter_map(|segment| {
            if let Some(code) = extract_scheme_codes(segment).into_iter().next() {
                return Some(FundRef::Code(code));
            }
            let name = clean_name(segment);
            is_meaningful_name(&name).then_some(FundRef::Name(name))
        })
        .collect()
}

fn strip_leading_filler(text: &str) -> String {
    let mut current = text.to_string();
    // filler can stack ("please compare the ...")
    loop {
        let next = LEADING_FILLER_RE.replace(&current, "").to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_name(raw: &str) -> String {
    let without_window = WINDOW_RE.replace_all(raw, " ");
    let trimmed = TRAILING_FILLER_RE.replace(without_window.trim(), "");
    let trimmed = NAME_SUFFIX_RE.replace(&trimmed, "");
    let trimmed = trimmed
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '?' || c == '.');

    let words: Vec<&str> = trimmed
        .split_whitespace()
        .skip_while(|w| matches!(w.to_lowercase().as_str(), "the" | "a" | "an"))
        .collect();
    words.join(" ")
}

fn is_meaningful_name(name: &str) -> bool {
    name.chars().filter(|c| c.is_alphabetic()).count() >= 3
}

fn search_term(raw: &str) -> String {
    const STOPWORDS: &[&str] = &[
        "me", "the", "a", "an", "some", "all", "good", "best", "top", "for", "of",
        "funds", "fund", "mutual", "schemes", "scheme", "performing", "to", "invest",
        "over", "in", "last", "past", "with", "that", "which", "are",
    ];

    let without_window = WINDOW_RE.replace_all(raw, " ");
    without_window
        .split(|c: char| c.is_whitespace() || c == '?' || c == '.' || c == ',')
        .filter(|w| !w.is_empty())
        .filter(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}
