//! Error types for the fund query agent

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors surfaced to callers of `AgentOrchestrator::handle`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {

    // =============================
    // Input Errors
    // =============================

    #[error("Ambiguous intent: {0}")]
    AmbiguousIntent(String),

    #[error("Unsupported intent: {0}")]
    UnsupportedIntent(String),

    // =============================
    // Resolution Errors
    // =============================

    #[error("Intent resolution timed out: {0}")]
    ResolverTimeout(String),

    // =============================
    // Evidence Errors
    // =============================

    #[error("Insufficient evidence: {0}")]
    InsufficientEvidence(String),

    #[error("Executor timed out: {0}")]
    ExecutorTimeout(String),

    // =============================
    // Synthesis Errors
    // =============================

    #[error("Synthesis timed out: {0}")]
    SynthesisTimeout(String),

    #[error("Synthesis upstream error: {0}")]
    SynthesisUpstream(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl AgentError {
    /// Stable machine-readable code for the route layer
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::AmbiguousIntent(_) => "ambiguous_intent",
            AgentError::UnsupportedIntent(_) => "unsupported_intent",
            AgentError::ResolverTimeout(_) => "resolver_timeout",
            AgentError::InsufficientEvidence(_) => "insufficient_evidence",
            AgentError::ExecutorTimeout(_) => "executor_timeout",
            AgentError::SynthesisTimeout(_) => "synthesis_timeout",
            AgentError::SynthesisUpstream(_) => "synthesis_upstream",
            AgentError::Cancelled => "cancelled",
        }
    }

    /// Input errors are the caller's to fix; they are never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AgentError::AmbiguousIntent(_) | AgentError::UnsupportedIntent(_)
        )
    }
}

/// Failures of a single fund data source call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Fund not found: {0}")]
    NotFound(String),

    #[error("Fund data request timed out")]
    Timeout,

    #[error("Fund data source returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid fund data: {0}")]
    Invalid(String),
}

impl GatewayError {
    /// Timeouts and 5xx/429-class responses may succeed on a second attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout => true,
            GatewayError::Upstream { status, .. } => *status >= 500 || *status == 429 || *status == 0,
            GatewayError::NotFound(_) | GatewayError::Invalid(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Invalid(e.to_string())
        } else if let Some(status) = e.status() {
            GatewayError::Upstream {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            // connect/reset errors carry no status; treat as transient
            GatewayError::Upstream {
                status: 0,
                message: e.to_string(),
            }
        }
    }
}

/// Failures of the reasoning (text generation) service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("Reasoning service timed out")]
    Timeout,

    #[error("Reasoning service error: {0}")]
    Upstream(String),

    #[error("Reasoning service rejected the request: {0}")]
    Rejected(String),

    #[error("Reasoning service not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed reasoning output: {0}")]
    Malformed(String),
}

impl ReasoningError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ReasoningError::Timeout | ReasoningError::Upstream(_))
    }
}

impl From<reqwest::Error> for ReasoningError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ReasoningError::Timeout
        } else if e.is_decode() {
            ReasoningError::Malformed(e.to_string())
        } else {
            ReasoningError::Upstream(e.to_string())
        }
    }
}
