//! Guardrail subsystem errors.
//!
//! These never reach the caller of a run. The evaluator resolves them through
//! the fail-safe policy and the orchestrator treats a failing guardrail as
//! pass-through.

use thiserror::Error;

/// Errors raised while evaluating a guardrail.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardrailError {
    /// The evaluation exceeded its budget.
    #[error("guardrail evaluation timed out after {0}")]
    Timeout(keel_types::DurationMs),

    /// The circuit breaker for this stage and model is open.
    #[error("circuit breaker open for {stage}/{model}")]
    CircuitOpen {
        /// Stage name.
        stage: String,
        /// Model name.
        model: String,
    },

    /// No evaluation model is configured.
    #[error("no guardrail model configured")]
    NoModel,

    /// The model provider failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// The model's answer was not a `{allowed, reason}` object.
    #[error("malformed guardrail decision: {0}")]
    MalformedDecision(String),

    /// A custom guardrail failed.
    #[error("guardrail failed: {0}")]
    Failed(String),
}
