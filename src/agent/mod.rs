//! Agent Orchestrator - composition root
//!
//! QUESTION → RESOLVE → EXECUTE → SYNTHESIZE → ANSWER
//!
//! Owns the end-to-end budget and the request's cancellation token. Stages
//! retry internally where they are allowed to; this layer never retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::budget::{RequestScope, Stage, StageAllocator, TimeBudget};
use crate::config::Settings;
use crate::error::AgentError;
use crate::execution::TaskGraphExecutor;
use crate::gateway::FundGateway;
use crate::models::{Answer, FundRef, HistoryWindow, Intent, Question, SchemeCode};
use crate::reasoning::ReasoningService;
use crate::resolver::IntentResolver;
use crate::synthesis::AnswerSynthesizer;
use crate::Result;

/// Main orchestrator that coordinates the pipeline
pub struct AgentOrchestrator {
    resolver: IntentResolver,
    executor: TaskGraphExecutor,
    synthesizer: AnswerSynthesizer,
    request_timeout: Duration,
    max_question_chars: usize,
}

impl AgentOrchestrator {
    pub fn new(
        resolver: IntentResolver,
        executor: TaskGraphExecutor,
        synthesizer: AnswerSynthesizer,
        request_timeout: Duration,
        max_question_chars: usize,
    ) -> Self {
        Self {
            resolver,
            executor,
            synthesizer,
            request_timeout,
            max_question_chars,
        }
    }

    /// Wire all stages from settings around the given capabilities
    pub fn from_settings(
        settings: &Settings,
        gateway: Arc<dyn FundGateway>,
        reasoning: Arc<dyn ReasoningService>,
    ) -> Self {
        let retry = settings.retry_policy();

        Self::new(
            IntentResolver::new(reasoning.clone(), retry),
            TaskGraphExecutor::new(gateway, retry).with_search_limit(settings.search_limit),
            AnswerSynthesizer::new(reasoning, retry)
                .with_temperature(settings.default_temperature)
                .with_strict(settings.strict_synthesis),
            settings.request_timeout,
            settings.max_question_chars,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Single entry point
    pub async fn handle(&self, question: &str) -> Result<Answer> {
        self.handle_with_cancel(question, CancellationToken::new())
            .await
    }

    /// Like `handle`, but stops at the next suspension point once `cancel` fires
    pub async fn handle_with_cancel(
        &self,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<Answer> {
        let scope = RequestScope::new(cancel);
        self.traced(&scope, self.run(&scope, question)).await
    }

    /// Side-by-side comparison of known scheme codes.
    ///
    /// The intent is built from the codes directly, so resolution makes no
    /// outbound call; execution and synthesis run as for a question.
    pub async fn compare_with_cancel(
        &self,
        codes: Vec<SchemeCode>,
        window: Option<HistoryWindow>,
        cancel: CancellationToken,
    ) -> Result<Answer> {
        let scope = RequestScope::new(cancel);
        self.traced(&scope, self.run_compare(&scope, codes, window))
            .await
    }

    async fn traced(
        &self,
        scope: &RequestScope,
        work: impl Future<Output = Result<Answer>>,
    ) -> Result<Answer> {
        let span = info_span!("handle", request_id = %scope.request_id);

        async {
            let started = Instant::now();
            let result = work.await;

            match &result {
                Ok(answer) => info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    source = ?answer.source,
                    completeness = answer.completeness,
                    degraded = answer.degraded,
                    "Question answered"
                ),
                Err(e) => warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    kind = e.kind(),
                    error = %e,
                    "Question rejected"
                ),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, scope: &RequestScope, raw: &str) -> Result<Answer> {
        let mut trace = vec!["INPUT: Question received".to_string()];

        let question = Question::new(raw, self.max_question_chars)?;
        if question.was_truncated() {
            warn!(max_chars = self.max_question_chars, "Question truncated");
            trace.push(format!(
                "INPUT: Truncated to {} characters",
                self.max_question_chars
            ));
        }

        let stages = StageAllocator::new(TimeBudget::new(self.request_timeout));

        // === RESOLVE ===
        let intent = self
            .resolver
            .resolve(scope, &question, stages.budget_for(Stage::Resolve))
            .await?;
        trace.push(format!("RESOLVE: {} intent", intent.operation()));
        scope.check_cancelled()?;

        self.answer(scope, &question, intent, &stages, trace).await
    }

    async fn run_compare(
        &self,
        scope: &RequestScope,
        codes: Vec<SchemeCode>,
        window: Option<HistoryWindow>,
    ) -> Result<Answer> {
        let mut trace = vec!["INPUT: Comparison request received".to_string()];

        let mut text = format!(
            "Compare {}",
            codes.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(" vs ")
        );
        if let Some(window) = window {
            text.push_str(&format!(" over {}", window));
        }
        let question = Question::new(&text, self.max_question_chars)?;

        let intent = Intent::compare(codes.into_iter().map(FundRef::Code).collect(), window)?;
        trace.push(format!("RESOLVE: {} intent supplied by caller", intent.operation()));

        let stages = StageAllocator::new(TimeBudget::new(self.request_timeout));
        self.answer(scope, &question, intent, &stages, trace).await
    }

    async fn answer(
        &self,
        scope: &RequestScope,
        question: &Question,
        intent: Intent,
        stages: &StageAllocator,
        mut trace: Vec<String>,
    ) -> Result<Answer> {
        // === EXECUTE ===
        let execute_budget = stages.budget_for(Stage::Execute);
        let evidence = self
            .executor
            .execute(scope, intent, execute_budget)
            .await?;
        trace.push(format!(
            "EXECUTE: {} / {} tasks succeeded",
            evidence.success_count(),
            evidence.entries().len()
        ));
        scope.check_cancelled()?;

        // === SYNTHESIZE ===
        let mut answer = self
            .synthesizer
            .synthesize(
                scope,
                question,
                evidence,
                stages.budget_for(Stage::Synthesize),
            )
            .await?;

        trace.append(&mut answer.reasoning_trace);
        answer.reasoning_trace = trace;
        Ok(answer)
    }
}

/// Caller-facing error text for a rejected question
pub fn describe_rejection(error: &AgentError) -> String {
    match error {
        AgentError::AmbiguousIntent(_) => {
            "Could not understand the question. Try naming a fund or scheme code, e.g. \
             \"Compare 119551 vs 120586\" or \"search SBI bluechip\"."
                .to_string()
        }
        AgentError::UnsupportedIntent(_) => {
            "Only fund search, lookup and comparison questions are supported.".to_string()
        }
        other => other.to_string(),
    }
}
