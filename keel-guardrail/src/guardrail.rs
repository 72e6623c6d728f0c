//! The [`Guardrail`] trait and the built-in guardrails.

use std::sync::Arc;

use async_trait::async_trait;
use keel_types::{DurationMs, GuardrailStage, ValidationResult};

use crate::config::FailSafe;
use crate::error::GuardrailError;
use crate::evaluator::{Evaluation, GuardrailService};

/// A predicate over input or output text.
///
/// Returning `Err` means the guardrail could not decide. The orchestrator
/// logs it and lets the content through; explicit rejections must be
/// `Ok(ValidationResult::Invalid { .. })`.
#[async_trait]
pub trait Guardrail: Send + Sync {
    /// Name used in events and logs.
    fn name(&self) -> &str;

    /// Time the guardrail needs to reach its own decision, including any
    /// fail-safe it applies on timeout. `None` uses the set's timeout.
    fn timeout(&self) -> Option<DurationMs> {
        None
    }

    /// Check `content`.
    async fn check(&self, content: &str) -> Result<ValidationResult, GuardrailError>;
}

/// Asks a fast model whether content complies with a natural-language rule.
pub struct LlmRuleGuardrail {
    name: String,
    stage: GuardrailStage,
    rule: String,
    model: Option<String>,
    fail_safe: FailSafe,
    timeout: DurationMs,
    service: Arc<GuardrailService>,
}

impl LlmRuleGuardrail {
    /// Create a rule guardrail evaluated through `service`.
    pub fn new(
        stage: GuardrailStage,
        rule: impl Into<String>,
        model: Option<String>,
        service: Arc<GuardrailService>,
    ) -> Self {
        Self {
            name: format!("llm_{stage}_rule"),
            stage,
            rule: rule.into(),
            model,
            fail_safe: FailSafe::Allow,
            timeout: DurationMs::from_millis(30_000),
            service,
        }
    }

    /// Set the fail-safe policy.
    #[must_use]
    pub fn with_fail_safe(mut self, fail_safe: FailSafe) -> Self {
        self.fail_safe = fail_safe;
        self
    }

    /// Set the evaluation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: DurationMs) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the guardrail name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Guardrail for LlmRuleGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<DurationMs> {
        Some(self.timeout)
    }

    async fn check(&self, content: &str) -> Result<ValidationResult, GuardrailError> {
        let decision = self
            .service
            .evaluate(Evaluation {
                stage: self.stage,
                rule: &self.rule,
                content,
                model: self.model.as_deref(),
                fail_safe: self.fail_safe,
                timeout: self.timeout,
            })
            .await;
        Ok(if decision.allowed {
            ValidationResult::Valid
        } else if decision.reason.is_empty() {
            ValidationResult::invalid(format!("{} guardrail rejected the content", self.stage))
        } else {
            ValidationResult::invalid(decision.reason)
        })
    }
}

/// Requires at least one `[n]`-style citation marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct CitationGuardrail;

impl CitationGuardrail {
    fn has_citation(content: &str) -> bool {
        let bytes = content.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'[' {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                if digits > 0 && bytes.get(i + 1 + digits) == Some(&b']') {
                    return true;
                }
            }
            i += 1;
        }
        false
    }
}

#[async_trait]
impl Guardrail for CitationGuardrail {
    fn name(&self) -> &str {
        "citations"
    }

    async fn check(&self, content: &str) -> Result<ValidationResult, GuardrailError> {
        Ok(if Self::has_citation(content) {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid("output must cite its sources with [n] markers")
        })
    }
}

/// A guardrail backed by a synchronous closure.
pub struct FnGuardrail<F> {
    name: String,
    f: F,
}

impl<F> FnGuardrail<F>
where
    F: Fn(&str) -> ValidationResult + Send + Sync,
{
    /// Wrap a predicate.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Guardrail for FnGuardrail<F>
where
    F: Fn(&str) -> ValidationResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, content: &str) -> Result<ValidationResult, GuardrailError> {
        Ok((self.f)(content))
    }
}
