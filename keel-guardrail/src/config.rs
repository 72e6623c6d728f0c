//! Guardrail configuration.

use keel_types::DurationMs;
use serde::{Deserialize, Serialize};

/// Smallest accepted guardrail timeout.
pub const MIN_TIMEOUT: DurationMs = DurationMs::from_millis(1_000);

/// What to decide when a guardrail cannot be evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailSafe {
    /// Let the content through and log a warning.
    #[default]
    Allow,
    /// Treat the content as a violation.
    Block,
}

/// How a list of guardrails is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One at a time, stopping at the first violation.
    Sequential,
    /// All at once, failure-isolated.
    #[default]
    Parallel,
}

/// Per-agent guardrail settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedGuardrailConfig {
    /// Natural-language rule applied to the run's input.
    pub input_prompt: Option<String>,
    /// Natural-language rule applied to the final output.
    pub output_prompt: Option<String>,
    /// Require `[n]`-style citations in the final output.
    pub require_citations: bool,
    /// Model used for evaluations; falls back to the run's default fast model.
    pub fast_model: Option<String>,
    /// Decision when an evaluation fails.
    pub fail_safe: FailSafe,
    /// Execution mode for input guardrails. Output guardrails are always
    /// sequential.
    pub execution_mode: ExecutionMode,
    /// Budget for each evaluation.
    pub timeout: DurationMs,
}

impl Default for AdvancedGuardrailConfig {
    fn default() -> Self {
        Self {
            input_prompt: None,
            output_prompt: None,
            require_citations: false,
            fast_model: None,
            fail_safe: FailSafe::Allow,
            execution_mode: ExecutionMode::Parallel,
            timeout: DurationMs::from_millis(30_000),
        }
    }
}

impl AdvancedGuardrailConfig {
    /// Set the input rule.
    #[must_use]
    pub fn with_input_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.input_prompt = Some(prompt.into());
        self
    }

    /// Set the output rule.
    #[must_use]
    pub fn with_output_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.output_prompt = Some(prompt.into());
        self
    }

    /// Require citations in the output.
    #[must_use]
    pub fn with_citations(mut self, required: bool) -> Self {
        self.require_citations = required;
        self
    }

    /// Set the evaluation model.
    #[must_use]
    pub fn with_fast_model(mut self, model: impl Into<String>) -> Self {
        self.fast_model = Some(model.into());
        self
    }

    /// Set the fail-safe policy.
    #[must_use]
    pub fn with_fail_safe(mut self, fail_safe: FailSafe) -> Self {
        self.fail_safe = fail_safe;
        self
    }

    /// Set the input execution mode.
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Set the evaluation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: DurationMs) -> Self {
        self.timeout = timeout;
        self
    }

    /// The timeout, clamped to at least [`MIN_TIMEOUT`].
    pub fn effective_timeout(&self) -> DurationMs {
        self.timeout.max(MIN_TIMEOUT)
    }
}

/// Settings for the shared [`GuardrailService`](crate::GuardrailService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailServiceConfig {
    /// How long a cached decision stays valid.
    pub cache_ttl: DurationMs,
    /// Maximum number of cached decisions.
    pub cache_capacity: usize,
    /// Consecutive failures that open a breaker.
    pub breaker_threshold: u32,
    /// How long an open breaker stays open after the last failure.
    pub breaker_reset: DurationMs,
    /// Closed breakers idle this long are dropped.
    pub breaker_idle_gc: DurationMs,
    /// Characters of content embedded in the evaluation prompt.
    pub preview_chars: usize,
}

impl Default for GuardrailServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DurationMs::from_millis(300_000),
            cache_capacity: 1_000,
            breaker_threshold: 5,
            breaker_reset: DurationMs::from_millis(60_000),
            breaker_idle_gc: DurationMs::from_millis(600_000),
            preview_chars: 2_000,
        }
    }
}
