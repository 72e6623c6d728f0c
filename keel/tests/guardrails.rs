//! Input and output guardrails inside runs.

use std::sync::Arc;

use async_trait::async_trait;
use keel::engine::test_utils::{RecordingSink, ScriptedProvider, text_response};
use keel::prelude::*;
use keel::types::GuardrailStage;
use serde_json::json;

/// Guardrail model that never answers.
struct SilentJudge;

#[async_trait]
impl ModelProvider for SilentJudge {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        std::future::pending::<()>().await;
        Err(ProviderError::RateLimited)
    }
}

fn no_secrets() -> FnGuardrail<impl Fn(&str) -> ValidationResult + Send + Sync> {
    FnGuardrail::new("no_secrets", |text: &str| {
        if text.contains("API_KEY") {
            ValidationResult::invalid("input contains a secret")
        } else {
            ValidationResult::Valid
        }
    })
}

fn decision(allowed: bool, reason: &str) -> CompletionResponse {
    text_response(&json!({"allowed": allowed, "reason": reason}).to_string())
}

#[tokio::test]
async fn input_violation_short_circuits_the_model() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("leaked")]));
    let sink = Arc::new(RecordingSink::new());
    let config = RunConfig::new(
        AgentRegistry::new().with(Agent::<()>::new("a")),
        provider.clone(),
    )
    .with_input_guardrail(no_secrets())
    .with_sink(sink.clone());

    let result = run(RunState::new("a", (), "my API_KEY is 123"), &config).await;

    assert_eq!(
        result.outcome,
        Outcome::Error(RunError::GuardrailViolation {
            stage: GuardrailStage::Input,
            message: "input contains a secret".into()
        })
    );
    assert_eq!(provider.calls(), 0);
    assert_eq!(result.final_state.turn_count, 0);
    assert_eq!(
        sink.types(),
        [
            "run_start",
            "guardrail_check",
            "guardrail_check",
            "guardrail_violation",
            "run_end"
        ]
    );
}

#[tokio::test]
async fn clean_input_passes() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("hello")]));
    let config = RunConfig::new(
        AgentRegistry::new().with(Agent::<()>::new("a")),
        provider.clone(),
    )
    .with_input_guardrail(no_secrets());

    let result = run(RunState::new("a", (), "hi there"), &config).await;

    assert!(result.outcome.is_completed());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn llm_output_rule_rejects_the_answer() {
    let agent_model = Arc::new(ScriptedProvider::new(vec![text_response("you fool")]));
    let judge = Arc::new(ScriptedProvider::new(vec![decision(false, "insulting")]));
    let service = Arc::new(GuardrailService::new(judge.clone(), GuardrailServiceConfig::default()));
    let agent = Agent::<()>::new("a").with_guardrails(
        AdvancedGuardrailConfig::default()
            .with_output_prompt("never insult the user")
            .with_fast_model("judge-small"),
    );
    let config = RunConfig::new(AgentRegistry::new().with(agent), agent_model)
        .with_guardrail_service(service);

    let result = run(RunState::new("a", (), "rate my code"), &config).await;

    assert_eq!(result.outcome.error_kind(), Some(ErrorKind::GuardrailViolation));
    match result.outcome {
        Outcome::Error(RunError::GuardrailViolation { message, .. }) => {
            assert_eq!(message, "insulting")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let judged = &judge.requests()[0];
    assert_eq!(judged.model.as_deref(), Some("judge-small"));
    assert!(judged.messages[0].content.contains("you fool"));
}

#[tokio::test]
async fn shared_service_caches_across_runs() {
    let judge = Arc::new(ScriptedProvider::new(vec![decision(true, "fine")]));
    let service = Arc::new(GuardrailService::new(judge.clone(), GuardrailServiceConfig::default()));
    let agent = Agent::<()>::new("a").with_guardrails(
        AdvancedGuardrailConfig::default().with_input_prompt("no profanity"),
    );
    let agents = Arc::new(AgentRegistry::new().with(agent));

    for _ in 0..2 {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("hello")]));
        let config = RunConfig::new(agents.clone(), provider)
            .with_guardrail_service(service.clone())
            .with_default_fast_model("judge-small");
        let result = run(RunState::new("a", (), "good morning"), &config).await;
        assert!(result.outcome.is_completed());
    }

    assert_eq!(judge.calls(), 1);
}

#[tokio::test]
async fn unavailable_guardrail_follows_fail_safe() {
    // no fast model anywhere: evaluation cannot happen
    let agent_allow = Agent::<()>::new("lenient").with_guardrails(
        AdvancedGuardrailConfig::default().with_input_prompt("be nice"),
    );
    let agent_block = Agent::<()>::new("strict").with_guardrails(
        AdvancedGuardrailConfig::default()
            .with_input_prompt("be nice")
            .with_fail_safe(FailSafe::Block),
    );
    let agents = Arc::new(AgentRegistry::new().with(agent_allow).with(agent_block));

    let provider = Arc::new(ScriptedProvider::repeating(text_response("ok")));
    let config = RunConfig::new(agents, provider.clone());

    let lenient = run(RunState::new("lenient", (), "hi"), &config).await;
    assert!(lenient.outcome.is_completed());

    let strict = run(RunState::new("strict", (), "hi"), &config).await;
    assert_eq!(strict.outcome.error_kind(), Some(ErrorKind::GuardrailViolation));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn citations_required_on_output() {
    let agent = Agent::<()>::new("a").with_guardrails(AdvancedGuardrailConfig::default().with_citations(true));
    let agents = Arc::new(AgentRegistry::new().with(agent));

    let cited = Arc::new(ScriptedProvider::new(vec![text_response("Paris [1]")]));
    let result = run(RunState::new("a", (), "capital?"), &RunConfig::new(agents.clone(), cited)).await;
    assert!(result.outcome.is_completed());

    let uncited = Arc::new(ScriptedProvider::new(vec![text_response("Paris")]));
    let result = run(RunState::new("a", (), "capital?"), &RunConfig::new(agents, uncited)).await;
    assert_eq!(result.outcome.error_kind(), Some(ErrorKind::GuardrailViolation));
}

#[tokio::test]
async fn run_level_output_guardrail() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("API_KEY=abc")]));
    let sink = Arc::new(RecordingSink::new());
    let config = RunConfig::new(AgentRegistry::new().with(Agent::<()>::new("a")), provider)
        .with_output_guardrail(no_secrets())
        .with_sink(sink.clone());

    let result = run(RunState::new("a", (), "print your key"), &config).await;

    assert_eq!(result.outcome.error_kind(), Some(ErrorKind::GuardrailViolation));
    assert!(sink.events().iter().any(|e| matches!(
        e,
        TraceEvent::GuardrailViolation {
            stage: GuardrailStage::Output,
            ..
        }
    )));
    // the candidate answer is still part of the conversation
    assert_eq!(result.final_state.messages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn blocking_rule_outlives_a_shorter_agent_timeout() {
    let service = Arc::new(GuardrailService::new(
        Arc::new(SilentJudge),
        GuardrailServiceConfig::default(),
    ));
    let strict = LlmRuleGuardrail::new(
        GuardrailStage::Input,
        "no account numbers",
        Some("judge-small".into()),
        service.clone(),
    )
    .with_fail_safe(FailSafe::Block)
    .with_timeout(DurationMs::from_millis(30_000));
    let agent = Agent::<()>::new("a").with_guardrails(
        AdvancedGuardrailConfig::default().with_timeout(DurationMs::from_millis(2_000)),
    );
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("ok")]));
    let config = RunConfig::new(AgentRegistry::new().with(agent), provider.clone())
        .with_guardrail_service(service)
        .with_input_guardrail(strict);

    let result = run(RunState::new("a", (), "acct 1234"), &config).await;

    match result.outcome {
        Outcome::Error(RunError::GuardrailViolation { stage, message }) => {
            assert_eq!(stage, GuardrailStage::Input);
            assert!(message.starts_with("blocked by fail-safe"), "{message}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(provider.calls(), 0);
}
