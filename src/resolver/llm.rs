//! Reasoning-backed structured intent extraction
//!
//! Used only when keyword classification is inconclusive but the question
//! is clearly about funds. The model must answer with one JSON object; the
//! object is validated against the Intent grammar and against the question
//! text before anything leaves this module.

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::budget::TimeBudget;
use crate::classifier::extract_window;
use crate::error::{AgentError, ReasoningError};
use crate::models::{FundRef, HistoryWindow, Intent, Question, SchemeCode};
use crate::reasoning::{GenerationConstraints, ReasoningService};
use crate::retry::RetryPolicy;
use crate::Result;

pub const EXTRACTION_INSTRUCTION: &str = r#"You convert questions about Indian mutual funds into one JSON object.

Supported operations:
- "search": find funds matching a term
- "lookup": details of exactly one fund
- "compare": two to five funds side by side
If the question asks for anything else, use the operation it asks for (for example "buy").
If you cannot tell, use "unknown".

Rules:
- Only use fund names and scheme codes that appear in the question
- Never invent scheme codes
- Return ONLY valid JSON
- No explanation text
- JSON format:

{
  "operation": "search" | "lookup" | "compare" | "unknown" | "<other>",
  "term": "<search term or null>",
  "funds": [{ "code": "<5-6 digit code or null>", "name": "<fund name or null>" }],
  "window": "1M" | "3M" | "6M" | "1Y" | "3Y" | "5Y" | null
}"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIntent {
    operation: String,
    term: Option<String>,
    funds: Vec<RawFund>,
    window: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFund {
    code: Option<Value>,
    name: Option<String>,
}

/// Structured-extraction call, bounded by `budget` and `cancel`.
///
/// Timeouts and 5xx-class failures get one more attempt after a backoff.
/// Running out of budget is `ResolverTimeout`; every other failure is
/// reported as ambiguity: the question could not be interpreted.
pub async fn extract_intent(
    reasoning: &dyn ReasoningService,
    question: &Question,
    budget: TimeBudget,
    cancel: &CancellationToken,
    retry: &RetryPolicy,
) -> Result<Intent> {
    let prompt = format!("QUESTION:\n{}\n\nReturn the JSON object.", question);
    let max_attempts = retry.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
        if budget.is_exhausted() {
            return Err(AgentError::ResolverTimeout(
                "no time left to interpret the question".to_string(),
            ));
        }

        attempt += 1;
        let limit = budget.share((max_attempts - attempt + 1) as usize);
        let constraints = GenerationConstraints::structured(EXTRACTION_INSTRUCTION, limit);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            outcome = tokio::time::timeout(limit, reasoning.generate(&prompt, &constraints)) => outcome,
        };

        let failure = match outcome {
            Ok(Ok(text)) => return parse_extraction(question.as_str(), &text),
            Ok(Err(e)) => {
                warn!(attempt, error = %e, service = reasoning.name(), "Intent extraction failed");
                e
            }
            Err(_) => {
                warn!(
                    attempt,
                    limit_ms = limit.as_millis() as u64,
                    service = reasoning.name(),
                    "Intent extraction timed out"
                );
                ReasoningError::Timeout
            }
        };

        if !failure.is_transient() {
            return Err(AgentError::AmbiguousIntent(
                "question could not be interpreted".to_string(),
            ));
        }
        if attempt >= max_attempts {
            return Err(match failure {
                ReasoningError::Timeout => AgentError::ResolverTimeout(
                    "question could not be interpreted in time".to_string(),
                ),
                _ => AgentError::AmbiguousIntent("question could not be interpreted".to_string()),
            });
        }

        let delay = retry.delay_for(attempt).min(budget.share(2));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Validates model output against the Intent grammar and the question text
pub fn parse_extraction(question: &str, response: &str) -> Result<Intent> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let raw: RawIntent = serde_json::from_str(cleaned).map_err(|e| {
        debug!(error = %e, raw = response, "Unparseable intent extraction");
        AgentError::AmbiguousIntent("interpretation was not valid JSON".to_string())
    })?;

    let operation = raw.operation.trim().to_lowercase();
    let window = extract_window(question).or_else(|| {
        raw.window
            .as_deref()
            .and_then(HistoryWindow::from_label)
    });

    match operation.as_str() {
        "search" => {
            let term = raw.term.unwrap_or_default();
            if !shares_word(question, &term) {
                return Err(AgentError::AmbiguousIntent(
                    "search term does not come from the question".to_string(),
                ));
            }
            Intent::search(&term)
        }
        "lookup" => {
            let funds = validate_funds(question, raw.funds)?;
            match funds.as_slice() {
                [fund] => Intent::lookup(fund.clone(), window),
                _ => Err(AgentError::AmbiguousIntent(
                    "lookup must name exactly one fund".to_string(),
                )),
            }
        }
        "compare" => Intent::compare(validate_funds(question, raw.funds)?, window),
        "" | "unknown" | "none" | "unclear" | "ambiguous" => Err(AgentError::AmbiguousIntent(
            "question does not map to search, lookup or compare".to_string(),
        )),
        other => Err(AgentError::UnsupportedIntent(format!(
            "'{}' is not a supported operation",
            other
        ))),
    }
}

fn validate_funds(question: &str, funds: Vec<RawFund>) -> Result<Vec<FundRef>> {
    funds
        .into_iter()
        .map(|fund| {
            let code = fund.code.as_ref().and_then(code_from_value);

            // exact code wins, but only if the question really contains it
            if let Some(code) = code {
                if question.contains(code.as_str()) {
                    return Ok(FundRef::Code(code));
                }
                return Err(AgentError::AmbiguousIntent(format!(
                    "scheme code {} is not in the question",
                    code
                )));
            }

            match fund.name.map(|n| n.trim().to_string()) {
                Some(name) if shares_word(question, &name) => Ok(FundRef::Name(name)),
                _ => Err(AgentError::AmbiguousIntent(
                    "fund reference does not come from the question".to_string(),
                )),
            }
        })
        .collect()
}

fn code_from_value(value: &Value) -> Option<SchemeCode> {
    match value {
        Value::String(s) => SchemeCode::parse(s),
        Value::Number(n) => SchemeCode::parse(&n.to_string()),
        _ => None,
    }
}

/// True when some word of `candidate` (3+ chars) appears in `question`
fn shares_word(question: &str, candidate: &str) -> bool {
    let question = question.to_lowercase();
    candidate
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() >= 3)
        .any(|w| question.contains(&w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{ScriptedReasoning, ScriptedReply};
    use std::time::Duration;

    const QUESTION: &str = "is mirae emerging bluechip any good compared to axis midcap";

    #[test]
    fn test_valid_compare_extraction() {
        let response = r#"```json
        {"operation": "compare", "funds": [{"name": "Mirae Emerging Bluechip"}, {"name": "Axis Midcap"}], "window": "3Y"}
        ```"#;

        let intent = parse_extraction(QUESTION, response).unwrap();
        match intent {
            Intent::Compare { funds, window } => {
                assert_eq!(funds.len(), 2);
                assert_eq!(window, Some(HistoryWindow::ThreeYears));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_out_of_grammar_output_is_rejected() {
        assert!(matches!(
            parse_extraction(QUESTION, "I think you mean Mirae"),
            Err(AgentError::AmbiguousIntent(_))
        ));
        assert!(matches!(
            parse_extraction(QUESTION, r#"{"operation": "unknown"}"#),
            Err(AgentError::AmbiguousIntent(_))
        ));
        assert!(matches!(
            parse_extraction(QUESTION, r#"{"operation": "redeem", "funds": []}"#),
            Err(AgentError::UnsupportedIntent(_))
        ));
    }

    #[test]
    fn test_invented_entities_are_rejected() {
        // code not present in the question
        let response = r#"{"operation": "lookup", "funds": [{"code": 118989}]}"#;
        assert!(matches!(
            parse_extraction(QUESTION, response),
            Err(AgentError::AmbiguousIntent(_))
        ));

        let response = r#"{"operation": "lookup", "funds": [{"name": "Quant Tax Plan"}]}"#;
        assert!(matches!(
            parse_extraction(QUESTION, response),
            Err(AgentError::AmbiguousIntent(_))
        ));
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::with_base_delay(Duration::from_millis(1))
    }

    const LOOKUP_JSON: &str =
        r#"{"operation": "lookup", "funds": [{"name": "Mirae Emerging Bluechip"}]}"#;

    #[tokio::test]
    async fn test_stalled_extraction_is_resolver_timeout() {
        let question = Question::new(QUESTION, 500).unwrap();
        let reasoning = ScriptedReasoning::always(ScriptedReply::Stall);

        let result = extract_intent(
            &reasoning,
            &question,
            TimeBudget::new(Duration::from_millis(40)),
            &CancellationToken::new(),
            &fast(),
        )
        .await;

        assert!(matches!(result, Err(AgentError::ResolverTimeout(_))));
        assert_eq!(reasoning.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let question = Question::new(QUESTION, 500).unwrap();
        let reasoning = ScriptedReasoning::new(vec![
            ScriptedReply::Error(ReasoningError::Upstream("503".into())),
            ScriptedReply::Text(LOOKUP_JSON.into()),
        ]);

        let intent = extract_intent(
            &reasoning,
            &question,
            TimeBudget::new(Duration::from_secs(2)),
            &CancellationToken::new(),
            &fast(),
        )
        .await
        .unwrap();

        assert_eq!(intent.operation(), "lookup");
        assert_eq!(reasoning.call_count(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_ambiguous_without_retry() {
        let question = Question::new(QUESTION, 500).unwrap();
        let reasoning = ScriptedReasoning::always(ScriptedReply::Error(ReasoningError::Rejected(
            "400".into(),
        )));

        let result = extract_intent(
            &reasoning,
            &question,
            TimeBudget::new(Duration::from_secs(2)),
            &CancellationToken::new(),
            &fast(),
        )
        .await;

        assert!(matches!(result, Err(AgentError::AmbiguousIntent(_))));
        assert_eq!(reasoning.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_resolver_timeout() {
        let question = Question::new(QUESTION, 500).unwrap();
        let reasoning = ScriptedReasoning::always(ScriptedReply::Text(LOOKUP_JSON.into()));

        let result = extract_intent(
            &reasoning,
            &question,
            TimeBudget::new(Duration::ZERO),
            &CancellationToken::new(),
            &fast(),
        )
        .await;

        assert!(matches!(result, Err(AgentError::ResolverTimeout(_))));
        assert_eq!(reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let question = Question::new(QUESTION, 500).unwrap();
        let reasoning = ScriptedReasoning::always(ScriptedReply::Stall);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = extract_intent(
            &reasoning,
            &question,
            TimeBudget::new(Duration::from_secs(5)),
            &cancel,
            &fast(),
        )
        .await;

        assert_eq!(result, Err(AgentError::Cancelled));
    }
}
