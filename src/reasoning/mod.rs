//! Reasoning service abstraction
//!
//! The reasoning service turns a prompt into text. It is used twice per
//! request at most: structured intent extraction when the classifier is
//! unsure, and the narrative answer. It never touches fund data directly.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::ReasoningError;

pub mod gemini;
pub use gemini::GeminiClient;

/// Per-call generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConstraints {
    pub system_instruction: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask for a bare JSON object
    pub json_only: bool,
    pub timeout: Duration,
}

impl GenerationConstraints {
    /// Deterministic JSON extraction
    pub fn structured(system_instruction: &str, timeout: Duration) -> Self {
        Self {
            system_instruction: system_instruction.to_string(),
            temperature: 0.0,
            max_output_tokens: 256,
            json_only: true,
            timeout,
        }
    }

    pub fn narrative(system_instruction: &str, temperature: f32, timeout: Duration) -> Self {
        Self {
            system_instruction: system_instruction.to_string(),
            temperature,
            max_output_tokens: 1024,
            json_only: false,
            timeout,
        }
    }
}

/// Text generation backend
#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, ReasoningError>;
}

/// Gemini when a key is configured, otherwise a service that always fails
/// (answers then come from the fallback template).
pub fn create_default_reasoning(settings: &Settings) -> Arc<dyn ReasoningService> {
    if !settings.has_reasoning_key() {
        warn!("GEMINI_API_KEY not set; answers will use the evidence template");
        return Arc::new(UnavailableReasoning);
    }

    match GeminiClient::new(settings.gemini_api_key.clone(), settings.gemini_model.clone()) {
        Ok(client) => {
            info!(model = %settings.gemini_model, "Gemini reasoning enabled");
            Arc::new(client)
        }
        Err(e) => {
            warn!(error = %e, "Gemini client unavailable; using evidence template");
            Arc::new(UnavailableReasoning)
        }
    }
}

/// Placeholder when no backend is configured
pub struct UnavailableReasoning;

#[async_trait]
impl ReasoningService for UnavailableReasoning {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _constraints: &GenerationConstraints,
    ) -> Result<String, ReasoningError> {
        Err(ReasoningError::NotConfigured(
            "no reasoning backend configured".to_string(),
        ))
    }
}

// ===== Scripted service =====

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Error(ReasoningError),
    /// Never answers; the caller's timeout decides
    Stall,
}

/// Scripted reasoning service for development & testing.
///
/// Replies are served in order; once the queue is empty the repeat reply
/// (if any) answers every further call.
#[derive(Default)]
pub struct ScriptedReasoning {
    replies: Mutex<VecDeque<ScriptedReply>>,
    repeat: Option<ScriptedReply>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedReasoning {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn always(reply: ScriptedReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        let queued = match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        queued.or_else(|| self.repeat.clone())
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        _constraints: &GenerationConstraints,
    ) -> Result<String, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        match self.next_reply() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Error(e)) => Err(e),
            Some(ScriptedReply::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ReasoningError::Timeout)
            }
            None => Err(ReasoningError::NotConfigured(
                "scripted replies exhausted".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn constraints() -> GenerationConstraints {
        GenerationConstraints::narrative("be brief", 0.1, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let service = ScriptedReasoning::new(vec![
            ScriptedReply::Error(ReasoningError::Timeout),
            ScriptedReply::Text("second".into()),
        ]);

        assert_err!(service.generate("one", &constraints()).await);
        assert_eq!(assert_ok!(service.generate("two", &constraints()).await), "second");
        assert_err!(service.generate("three", &constraints()).await);

        assert_eq!(service.call_count(), 3);
        assert_eq!(service.prompts(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_stall_is_bounded_by_caller() {
        let service = ScriptedReasoning::always(ScriptedReply::Stall);
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            service.generate("anything", &constraints()),
        )
        .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_reasoning() {
        let result = UnavailableReasoning.generate("q", &constraints()).await;
        assert!(matches!(result, Err(ReasoningError::NotConfigured(_))));
    }

    #[test]
    fn test_default_reasoning_without_key() {
        let service = create_default_reasoning(&Settings::default());
        assert_eq!(service.name(), "unavailable");
    }
}
