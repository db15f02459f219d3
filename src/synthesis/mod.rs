//! Answer Synthesizer
//!
//! Turns an EvidenceSet into an Answer:
//!
//! Pending → Generating → Validating → Done
//! Generating → Failed → Generating (attempt 2) → Validating → Done | Fallback → Done
//!
//! Generation runs at most twice. A grounding violation buys exactly one
//! corrective regeneration; anything still unresolved after that ends in
//! the evidence-only template, which cannot fail.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::budget::{RequestScope, TimeBudget};
use crate::error::{AgentError, ReasoningError};
use crate::models::{Answer, AnswerSource, EvidenceSet, Question};
use crate::reasoning::{GenerationConstraints, ReasoningService};
use crate::retry::RetryPolicy;
use crate::verification::{
    create_default_grounding_verifier, EvidenceFacts, GroundingVerifier, GroundingViolation,
};
use crate::Result;

pub mod fallback;
pub mod prompt;

pub use prompt::SYNTHESIS_INSTRUCTION;

/// Generation attempts per request (first try + one regeneration)
pub const MAX_GENERATION_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisState {
    Pending,
    Generating { attempt: u8 },
    Validating { attempt: u8 },
    Failed { attempt: u8, reason: String },
    Fallback,
    Done,
}

impl fmt::Display for SynthesisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisState::Pending => write!(f, "SYNTHESIZE: Pending"),
            SynthesisState::Generating { attempt } => {
                write!(f, "SYNTHESIZE: Generating (attempt {})", attempt)
            }
            SynthesisState::Validating { attempt } => {
                write!(f, "SYNTHESIZE: Validating (attempt {})", attempt)
            }
            SynthesisState::Failed { attempt, reason } => {
                write!(f, "SYNTHESIZE: Failed (attempt {}): {}", attempt, reason)
            }
            SynthesisState::Fallback => write!(f, "SYNTHESIZE: Fallback to evidence template"),
            SynthesisState::Done => write!(f, "SYNTHESIZE: Done"),
        }
    }
}

/// Records every transition for the Answer's reasoning trace
struct Transitions {
    states: Vec<SynthesisState>,
}

impl Transitions {
    fn new() -> Self {
        Self {
            states: vec![SynthesisState::Pending],
        }
    }

    fn push(&mut self, state: SynthesisState) {
        debug!(state = %state, "Synthesis transition");
        self.states.push(state);
    }

    fn into_trace(self) -> Vec<String> {
        self.states.iter().map(ToString::to_string).collect()
    }
}

pub struct AnswerSynthesizer {
    reasoning: Arc<dyn ReasoningService>,
    verifier: GroundingVerifier,
    retry: RetryPolicy,
    temperature: f32,
    strict: bool,
}

impl AnswerSynthesizer {
    pub fn new(reasoning: Arc<dyn ReasoningService>, retry: RetryPolicy) -> Self {
        Self {
            reasoning,
            verifier: create_default_grounding_verifier(),
            retry,
            temperature: 0.1,
            strict: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Surface reasoning-service failures instead of falling back
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_verifier(mut self, verifier: GroundingVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub async fn synthesize(
        &self,
        scope: &RequestScope,
        question: &Question,
        evidence: EvidenceSet,
        budget: TimeBudget,
    ) -> Result<Answer> {
        let facts = EvidenceFacts::from_evidence(&evidence);
        let mut transitions = Transitions::new();
        let mut correction: Option<GroundingViolation> = None;
        let mut last_failure: Option<ReasoningError> = None;
        let mut attempts: u8 = 0;

        while attempts < MAX_GENERATION_ATTEMPTS {
            scope.check_cancelled()?;

            if budget.is_exhausted() {
                last_failure = Some(ReasoningError::Timeout);
                transitions.push(SynthesisState::Failed {
                    attempt: attempts + 1,
                    reason: "no time left".to_string(),
                });
                break;
            }

            attempts += 1;
            let attempts_left = (MAX_GENERATION_ATTEMPTS - attempts + 1) as usize;
            let limit = budget.share(attempts_left);

            transitions.push(SynthesisState::Generating { attempt: attempts });

            let prompt = prompt::build_prompt(question, &evidence, correction.as_ref());
            let constraints =
                GenerationConstraints::narrative(SYNTHESIS_INSTRUCTION, self.temperature, limit);

            let outcome = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = tokio::time::timeout(limit, self.reasoning.generate(&prompt, &constraints)) => outcome,
            };

            let text = match outcome {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!(
                        request_id = %scope.request_id,
                        attempt = attempts,
                        error = %e,
                        "Answer generation failed"
                    );
                    transitions.push(SynthesisState::Failed {
                        attempt: attempts,
                        reason: e.to_string(),
                    });

                    let give_up = matches!(
                        e,
                        ReasoningError::NotConfigured(_) | ReasoningError::Rejected(_)
                    );
                    let transient = e.is_transient();
                    last_failure = Some(e);

                    if give_up {
                        break;
                    }
                    if transient && attempts < MAX_GENERATION_ATTEMPTS {
                        let delay = self.retry.delay_for(attempts as u32).min(budget.share(2));
                        self.pause(scope, delay).await?;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(
                        request_id = %scope.request_id,
                        attempt = attempts,
                        limit_ms = limit.as_millis() as u64,
                        "Answer generation timed out"
                    );
                    transitions.push(SynthesisState::Failed {
                        attempt: attempts,
                        reason: "timed out".to_string(),
                    });
                    last_failure = Some(ReasoningError::Timeout);
                    continue;
                }
            };

            transitions.push(SynthesisState::Validating { attempt: attempts });

            match self.verifier.verify_with(text.trim(), &facts) {
                Ok(()) => {
                    transitions.push(SynthesisState::Done);
                    info!(
                        request_id = %scope.request_id,
                        attempts,
                        completeness = evidence.completeness(),
                        "Answer generated"
                    );
                    return Ok(Answer::new(
                        scope.request_id,
                        text.trim().to_string(),
                        evidence,
                        AnswerSource::Reasoning,
                        attempts,
                        transitions.into_trace(),
                    ));
                }
                Err(violation) => {
                    warn!(
                        request_id = %scope.request_id,
                        attempt = attempts,
                        %violation,
                        "Generated answer is not grounded"
                    );
                    transitions.push(SynthesisState::Failed {
                        attempt: attempts,
                        reason: violation.to_string(),
                    });
                    // grounding problems are recovered, never surfaced
                    last_failure = None;
                    correction = Some(violation);
                }
            }
        }

        if self.strict {
            if let Some(failure) = last_failure {
                return Err(match failure {
                    ReasoningError::Timeout => AgentError::SynthesisTimeout(
                        "reasoning service did not answer within budget".to_string(),
                    ),
                    other => AgentError::SynthesisUpstream(other.to_string()),
                });
            }
        }

        transitions.push(SynthesisState::Fallback);
        let summary = fallback::render(&evidence);
        transitions.push(SynthesisState::Done);

        info!(
            request_id = %scope.request_id,
            attempts,
            completeness = evidence.completeness(),
            "Answer rendered from evidence template"
        );

        Ok(Answer::new(
            scope.request_id,
            summary,
            evidence,
            AnswerSource::Fallback,
            attempts,
            transitions.into_trace(),
        ))
    }

    async fn pause(&self, scope: &RequestScope, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => Err(AgentError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
