#![deny(missing_docs)]
//! Guardrail resilience layer for keel.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | [`AdvancedGuardrailConfig`], [`GuardrailServiceConfig`], [`FailSafe`], [`ExecutionMode`] |
//! | [`sanitize`] | length cap and prompt-safe content preview |
//! | [`cache`] | TTL decision cache with frequency-over-age eviction |
//! | [`breaker`] | per-`(stage, model)` circuit breakers |
//! | [`evaluator`] | [`GuardrailService`], the shared LLM evaluator |
//! | [`guardrail`] | [`Guardrail`] trait and built-ins |
//! | [`orchestrator`] | [`GuardrailSet`]: effective lists, sequential/parallel execution |
//!
//! Nothing in this crate produces a run error. Evaluation failures resolve
//! through the fail-safe policy; guardrails that error or time out inside a
//! set are treated as pass-through.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod guardrail;
pub mod orchestrator;
pub mod sanitize;

pub use breaker::CircuitBreakers;
pub use cache::{CacheKey, GuardrailCache};
pub use config::{AdvancedGuardrailConfig, ExecutionMode, FailSafe, GuardrailServiceConfig};
pub use error::GuardrailError;
pub use evaluator::{Evaluation, GuardrailDecision, GuardrailService, parse_decision};
pub use guardrail::{CitationGuardrail, FnGuardrail, Guardrail, LlmRuleGuardrail};
pub use orchestrator::GuardrailSet;
pub use sanitize::{content_cap, sanitize};
