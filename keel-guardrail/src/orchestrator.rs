//! Assembling and running guardrail lists.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use keel_types::{DurationMs, Emitter, GuardrailPhase, GuardrailStage, TraceEvent, ValidationResult};

use crate::config::{AdvancedGuardrailConfig, ExecutionMode};
use crate::evaluator::GuardrailService;
use crate::guardrail::{CitationGuardrail, Guardrail, LlmRuleGuardrail};

/// Extra time given to each orchestrated guardrail on top of its own
/// timeout, so the evaluator's timeout and fail-safe decide first.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// The effective guardrails for one stage of a run.
pub struct GuardrailSet {
    stage: GuardrailStage,
    mode: ExecutionMode,
    timeout: Duration,
    guardrails: Vec<Arc<dyn Guardrail>>,
}

impl GuardrailSet {
    /// Create a set from explicit parts.
    pub fn new(
        stage: GuardrailStage,
        mode: ExecutionMode,
        timeout: DurationMs,
        guardrails: Vec<Arc<dyn Guardrail>>,
    ) -> Self {
        Self {
            stage,
            mode,
            timeout: timeout.to_std() + TIMEOUT_GRACE,
            guardrails,
        }
    }

    /// Input guardrails: the run-level list followed by the agent's input
    /// rule. Runs in the agent's configured mode.
    pub fn for_input(
        run_level: &[Arc<dyn Guardrail>],
        agent: Option<&AdvancedGuardrailConfig>,
        service: &Arc<GuardrailService>,
        default_fast_model: Option<&str>,
    ) -> Self {
        let defaults = AdvancedGuardrailConfig::default();
        let cfg = agent.unwrap_or(&defaults);
        let mut guardrails = run_level.to_vec();
        if let Some(rule) = &cfg.input_prompt {
            guardrails.push(Arc::new(rule_guardrail(
                GuardrailStage::Input,
                rule,
                cfg,
                service,
                default_fast_model,
            )));
        }
        Self::new(
            GuardrailStage::Input,
            cfg.execution_mode,
            cfg.effective_timeout(),
            guardrails,
        )
    }

    /// Output guardrails: the run-level list followed by the agent's output
    /// rule and citation requirement. Always sequential.
    pub fn for_output(
        run_level: &[Arc<dyn Guardrail>],
        agent: Option<&AdvancedGuardrailConfig>,
        service: &Arc<GuardrailService>,
        default_fast_model: Option<&str>,
    ) -> Self {
        let defaults = AdvancedGuardrailConfig::default();
        let cfg = agent.unwrap_or(&defaults);
        let mut guardrails = run_level.to_vec();
        if let Some(rule) = &cfg.output_prompt {
            guardrails.push(Arc::new(rule_guardrail(
                GuardrailStage::Output,
                rule,
                cfg,
                service,
                default_fast_model,
            )));
        }
        if cfg.require_citations {
            guardrails.push(Arc::new(CitationGuardrail));
        }
        Self::new(
            GuardrailStage::Output,
            ExecutionMode::Sequential,
            cfg.effective_timeout(),
            guardrails,
        )
    }

    /// Stage this set protects.
    pub fn stage(&self) -> GuardrailStage {
        self.stage
    }

    /// Execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Number of guardrails.
    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    /// Whether the set has no guardrails.
    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    /// Run every guardrail against `content` in the configured mode.
    pub async fn run(&self, content: &str, emitter: &Emitter) -> ValidationResult {
        match self.mode {
            ExecutionMode::Sequential => self.run_sequential(content, emitter).await,
            ExecutionMode::Parallel => self.run_parallel(content, emitter).await,
        }
    }

    /// Run in order, stopping at the first violation. A guardrail that
    /// fails or times out is skipped.
    pub async fn run_sequential(&self, content: &str, emitter: &Emitter) -> ValidationResult {
        for guardrail in &self.guardrails {
            let result = self.check_one(guardrail.as_ref(), content, emitter).await;
            if !result.is_valid() {
                return result;
            }
        }
        ValidationResult::Valid
    }

    /// Run all concurrently and wait for every result. The batch is invalid
    /// if any guardrail explicitly rejected the content; the first such
    /// rejection in list order is reported.
    pub async fn run_parallel(&self, content: &str, emitter: &Emitter) -> ValidationResult {
        let results = join_all(
            self.guardrails
                .iter()
                .map(|g| self.check_one(g.as_ref(), content, emitter)),
        )
        .await;
        results
            .into_iter()
            .find(|r| !r.is_valid())
            .unwrap_or(ValidationResult::Valid)
    }

    async fn check_one(
        &self,
        guardrail: &dyn Guardrail,
        content: &str,
        emitter: &Emitter,
    ) -> ValidationResult {
        let name = guardrail.name().to_string();
        emitter.emit(TraceEvent::GuardrailCheck {
            stage: self.stage,
            guardrail: name.clone(),
            phase: GuardrailPhase::Start,
            passed: None,
        });

        let budget = guardrail
            .timeout()
            .map_or(self.timeout, |t| t.to_std() + TIMEOUT_GRACE);
        let result = match tokio::time::timeout(budget, guardrail.check(content)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                tracing::warn!(
                    stage = %self.stage,
                    guardrail = %name,
                    error = %err,
                    "keel.guardrail.degraded"
                );
                ValidationResult::Valid
            }
            Err(_) => {
                tracing::warn!(
                    stage = %self.stage,
                    guardrail = %name,
                    timeout_ms = budget.as_millis() as u64,
                    "keel.guardrail.timeout"
                );
                ValidationResult::Valid
            }
        };

        emitter.emit(TraceEvent::GuardrailCheck {
            stage: self.stage,
            guardrail: name,
            phase: GuardrailPhase::End,
            passed: Some(result.is_valid()),
        });
        result
    }
}

fn rule_guardrail(
    stage: GuardrailStage,
    rule: &str,
    cfg: &AdvancedGuardrailConfig,
    service: &Arc<GuardrailService>,
    default_fast_model: Option<&str>,
) -> LlmRuleGuardrail {
    let model = cfg
        .fast_model
        .clone()
        .or_else(|| default_fast_model.map(str::to_string));
    LlmRuleGuardrail::new(stage, rule, model, service.clone())
        .with_fail_safe(cfg.fail_safe)
        .with_timeout(cfg.effective_timeout())
}

impl std::fmt::Debug for GuardrailSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailSet")
            .field("stage", &self.stage)
            .field("mode", &self.mode)
            .field(
                "guardrails",
                &self.guardrails.iter().map(|g| g.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardrailError;
    use crate::guardrail::FnGuardrail;
    use async_trait::async_trait;
    use keel_types::{EventRecord, FnSink};
    use std::sync::Mutex;

    struct Failing;

    #[async_trait]
    impl Guardrail for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn check(&self, _content: &str) -> Result<ValidationResult, GuardrailError> {
            Err(GuardrailError::Failed("internal".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl Guardrail for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn check(&self, _content: &str) -> Result<ValidationResult, GuardrailError> {
            std::future::pending::<()>().await;
            Ok(ValidationResult::Valid)
        }
    }

    fn deny(name: &'static str) -> Arc<dyn Guardrail> {
        Arc::new(FnGuardrail::new(name, move |_: &str| {
            ValidationResult::invalid(format!("{name} says no"))
        }))
    }

    fn allow(name: &'static str) -> Arc<dyn Guardrail> {
        Arc::new(FnGuardrail::new(name, |_: &str| ValidationResult::Valid))
    }

    fn recording() -> (Emitter, Arc<Mutex<Vec<EventRecord>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink = FnSink::new(move |r: &EventRecord| sink_events.lock().unwrap().push(r.clone()));
        (
            Emitter::new(Arc::new(sink), "run".into(), "trace".into()),
            events,
        )
    }

    fn set(mode: ExecutionMode, guardrails: Vec<Arc<dyn Guardrail>>) -> GuardrailSet {
        GuardrailSet::new(
            GuardrailStage::Input,
            mode,
            DurationMs::from_millis(1_000),
            guardrails,
        )
    }

    #[tokio::test]
    async fn sequential_stops_at_first_violation() {
        let (emitter, events) = recording();
        let s = set(
            ExecutionMode::Sequential,
            vec![allow("a"), deny("b"), deny("c")],
        );
        let result = s.run("text", &emitter).await;
        assert_eq!(result.error_message(), Some("b says no"));
        // start+end for a and b only
        assert_eq!(events.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn sequential_skips_failing_guardrail() {
        let (emitter, _) = recording();
        let s = set(
            ExecutionMode::Sequential,
            vec![Arc::new(Failing), deny("after")],
        );
        assert_eq!(
            s.run("text", &emitter).await.error_message(),
            Some("after says no")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_isolates_failures() {
        let (emitter, events) = recording();
        let s = set(
            ExecutionMode::Parallel,
            vec![Arc::new(Failing), Arc::new(Hanging), allow("ok")],
        );
        assert!(s.run("text", &emitter).await.is_valid());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 6);
        let passed: Vec<_> = events
            .iter()
            .filter_map(|r| match &r.event {
                TraceEvent::GuardrailCheck {
                    phase: GuardrailPhase::End,
                    passed,
                    ..
                } => *passed,
                _ => None,
            })
            .collect();
        assert_eq!(passed, [true, true, true]);
    }

    #[tokio::test]
    async fn parallel_reports_any_violation() {
        let (emitter, events) = recording();
        let s = set(
            ExecutionMode::Parallel,
            vec![allow("a"), Arc::new(Failing), deny("c"), allow("d")],
        );
        assert_eq!(
            s.run("text", &emitter).await.error_message(),
            Some("c says no")
        );
        assert_eq!(events.lock().unwrap().len(), 8);
    }

    struct HangingModel;

    #[async_trait]
    impl keel_types::ModelProvider for HangingModel {
        async fn complete(
            &self,
            _r: keel_types::CompletionRequest,
        ) -> Result<keel_types::CompletionResponse, keel_types::ProviderError> {
            std::future::pending::<()>().await;
            Err(keel_types::ProviderError::RateLimited)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rule_guardrail_keeps_its_own_budget_and_fail_safe() {
        let service = Arc::new(GuardrailService::new(
            Arc::new(HangingModel),
            crate::config::GuardrailServiceConfig::default(),
        ));
        let strict = LlmRuleGuardrail::new(
            GuardrailStage::Input,
            "no secrets",
            Some("judge".into()),
            service,
        )
        .with_fail_safe(crate::config::FailSafe::Block)
        .with_timeout(DurationMs::from_millis(30_000));
        assert_eq!(strict.timeout(), Some(DurationMs::from_millis(30_000)));

        let (emitter, _) = recording();
        let started = tokio::time::Instant::now();
        // the set's own timeout is much shorter than the guardrail's
        let s = set(ExecutionMode::Sequential, vec![Arc::new(strict)]);
        let result = s.run("text", &emitter).await;

        let message = result.error_message().unwrap_or_default();
        assert!(message.starts_with("blocked by fail-safe"), "{message}");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[test]
    fn builds_effective_lists() {
        struct Never;
        #[async_trait]
        impl keel_types::ModelProvider for Never {
            async fn complete(
                &self,
                _r: keel_types::CompletionRequest,
            ) -> Result<keel_types::CompletionResponse, keel_types::ProviderError> {
                Err(keel_types::ProviderError::RateLimited)
            }
        }
        let service = Arc::new(GuardrailService::new(
            Arc::new(Never),
            crate::config::GuardrailServiceConfig::default(),
        ));
        let cfg = AdvancedGuardrailConfig::default()
            .with_input_prompt("no insults")
            .with_output_prompt("be polite")
            .with_citations(true)
            .with_execution_mode(ExecutionMode::Sequential);
        let run_level = vec![allow("global")];

        let input = GuardrailSet::for_input(&run_level, Some(&cfg), &service, None);
        assert_eq!(input.len(), 2);
        assert_eq!(input.mode(), ExecutionMode::Sequential);

        let output = GuardrailSet::for_output(&run_level, Some(&cfg), &service, None);
        assert_eq!(output.len(), 3);
        assert_eq!(output.mode(), ExecutionMode::Sequential);

        let bare = GuardrailSet::for_input(&run_level, None, &service, None);
        assert_eq!(bare.len(), 1);
        assert_eq!(bare.mode(), ExecutionMode::Parallel);
    }
}
