//! Intent Resolver
//!
//! Maps a question onto exactly one of search / lookup / compare.
//! Keyword classification runs first; the reasoning service is consulted
//! only when that is inconclusive and the question is about funds at all,
//! so gibberish is rejected without any outbound call.

use std::sync::Arc;
use tracing::{debug, info};

use crate::budget::{RequestScope, TimeBudget};
use crate::classifier::{Classification, QuestionClassifier};
use crate::error::AgentError;
use crate::models::{Intent, Question};
use crate::reasoning::ReasoningService;
use crate::retry::RetryPolicy;
use crate::Result;

pub mod llm;

pub struct IntentResolver {
    reasoning: Arc<dyn ReasoningService>,
    retry: RetryPolicy,
}

impl IntentResolver {
    pub fn new(reasoning: Arc<dyn ReasoningService>, retry: RetryPolicy) -> Self {
        Self { reasoning, retry }
    }

    pub async fn resolve(
        &self,
        scope: &RequestScope,
        question: &Question,
        budget: TimeBudget,
    ) -> Result<Intent> {
        match QuestionClassifier::classify(question.as_str()) {
            Classification::Resolved(intent) => {
                debug!(
                    request_id = %scope.request_id,
                    operation = intent.operation(),
                    "Intent resolved from keywords"
                );
                Ok(intent)
            }

            Classification::Unsupported(operation) => Err(AgentError::UnsupportedIntent(format!(
                "'{}' is not supported; ask to search, look up or compare funds",
                operation
            ))),

            Classification::Unclear { domain_signal: false } => Err(AgentError::AmbiguousIntent(
                "question does not mention a fund, scheme code or fund-related term".to_string(),
            )),

            Classification::Unclear { domain_signal: true } => {
                info!(
                    request_id = %scope.request_id,
                    service = self.reasoning.name(),
                    "Keywords inconclusive, asking reasoning service"
                );
                let intent = llm::extract_intent(
                    self.reasoning.as_ref(),
                    question,
                    budget,
                    &scope.cancel,
                    &self.retry,
                )
                .await?;
                debug!(
                    request_id = %scope.request_id,
                    operation = intent.operation(),
                    "Intent resolved by extraction"
                );
                Ok(intent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FundRef;
    use crate::reasoning::{ScriptedReasoning, ScriptedReply};
    use std::time::Duration;

    fn resolver(reasoning: Arc<ScriptedReasoning>) -> IntentResolver {
        IntentResolver::new(reasoning, RetryPolicy::with_base_delay(Duration::from_millis(1)))
    }

    fn budget() -> TimeBudget {
        TimeBudget::new(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_keyword_path_skips_reasoning() {
        let reasoning = Arc::new(ScriptedReasoning::default());
        let question = Question::new("Compare 119551 vs 120586", 500).unwrap();

        let intent = resolver(reasoning.clone())
            .resolve(&RequestScope::detached(), &question, budget())
            .await
            .unwrap();

        assert_eq!(intent.operation(), "compare");
        assert_eq!(reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn test_gibberish_fails_fast() {
        let reasoning = Arc::new(ScriptedReasoning::always(ScriptedReply::Text(
            r#"{"operation": "search", "term": "asdkjasd"}"#.into(),
        )));
        let question = Question::new("asdkjasd", 500).unwrap();

        let result = resolver(reasoning.clone())
            .resolve(&RequestScope::detached(), &question, budget())
            .await;

        assert!(matches!(result, Err(AgentError::AmbiguousIntent(_))));
        assert_eq!(reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let reasoning = Arc::new(ScriptedReasoning::default());
        let question = Question::new("Sell my SBI Bluechip units", 500).unwrap();

        let result = resolver(reasoning)
            .resolve(&RequestScope::detached(), &question, budget())
            .await;

        assert!(matches!(result, Err(AgentError::UnsupportedIntent(_))));
    }

    #[tokio::test]
    async fn test_extraction_fallback() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![ScriptedReply::Text(
            r#"{"operation": "lookup", "funds": [{"name": "Mirae Emerging Bluechip"}]}"#.into(),
        )]));
        let question = Question::new("is mirae emerging bluechip any good", 500).unwrap();

        let intent = resolver(reasoning.clone())
            .resolve(&RequestScope::detached(), &question, budget())
            .await
            .unwrap();

        assert_eq!(
            intent,
            Intent::Lookup {
                fund: FundRef::Name("Mirae Emerging Bluechip".into()),
                window: None,
            }
        );
        assert_eq!(reasoning.call_count(), 1);
    }
}
