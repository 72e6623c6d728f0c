//! One `GuardrailService` shared by concurrent evaluations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use keel_guardrail::{
    Evaluation, FailSafe, Guardrail, GuardrailService, GuardrailServiceConfig, LlmRuleGuardrail,
};
use keel_types::{
    AssistantMessage, CompletionRequest, CompletionResponse, DurationMs, GuardrailStage,
    ModelProvider, ProviderError, ValidationResult,
};

/// Allows everything, or fails everything.
struct Judge {
    fail: bool,
    call_count: AtomicUsize,
}

impl Judge {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            call_count: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for Judge {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail {
            return Err(ProviderError::RequestFailed("unavailable".into()));
        }
        Ok(CompletionResponse {
            message: AssistantMessage::text(r#"{"allowed": true, "reason": "ok"}"#),
            usage: None,
        })
    }
}

fn evaluation(content: &str, fail_safe: FailSafe) -> Evaluation<'_> {
    Evaluation {
        stage: GuardrailStage::Output,
        rule: "stay on topic",
        content,
        model: Some("judge"),
        fail_safe,
        timeout: DurationMs::from_millis(5_000),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluations_share_one_cache() {
    let judge = Judge::new(false);
    let service = Arc::new(GuardrailService::new(judge.clone(), GuardrailServiceConfig::default()));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let content = format!("answer #{}", i % 4);
                service.evaluate(evaluation(&content, FailSafe::Block)).await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().allowed);
    }

    assert_eq!(service.cache().len(), 4);
    // concurrent misses on the same key may each reach the model
    assert!(judge.calls() >= 4 && judge.calls() <= 16);

    let before = judge.calls();
    let again: Vec<_> = (0..4)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let content = format!("answer #{i}");
                service.evaluate(evaluation(&content, FailSafe::Block)).await
            })
        })
        .collect();
    for task in again {
        assert!(task.await.unwrap().allowed);
    }
    assert_eq!(judge.calls(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_from_independent_tasks_open_one_breaker() {
    let judge = Judge::new(true);
    let service = Arc::new(GuardrailService::new(judge.clone(), GuardrailServiceConfig::default()));

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let content = format!("draft {i}");
                service.evaluate(evaluation(&content, FailSafe::Allow)).await
            })
        })
        .collect();
    for task in tasks {
        let decision = task.await.unwrap();
        assert!(decision.allowed);
        assert!(decision.reason.starts_with("allowed by fail-safe"));
    }
    assert_eq!(judge.calls(), 5);
    assert!(service.breakers().is_open(GuardrailStage::Output, "judge"));

    let blocked = service.evaluate(evaluation("draft 6", FailSafe::Block)).await;
    assert!(!blocked.allowed);
    assert_eq!(judge.calls(), 5);

    // the input stage has its own breaker
    assert!(!service.breakers().is_open(GuardrailStage::Input, "judge"));
    assert_eq!(service.cache().len(), 0);
}

#[tokio::test]
async fn rule_guardrails_on_one_service_reuse_decisions() {
    let judge = Judge::new(false);
    let service = Arc::new(GuardrailService::new(judge.clone(), GuardrailServiceConfig::default()));
    let first = LlmRuleGuardrail::new(
        GuardrailStage::Output,
        "stay on topic",
        Some("judge".into()),
        service.clone(),
    );
    let second = LlmRuleGuardrail::new(
        GuardrailStage::Output,
        "stay on topic",
        Some("judge".into()),
        service,
    )
    .with_name("topic_check");

    assert_eq!(first.check("the weather is nice").await.unwrap(), ValidationResult::Valid);
    assert_eq!(second.check("the weather is nice").await.unwrap(), ValidationResult::Valid);
    assert_eq!(judge.calls(), 1);
    assert_eq!(second.name(), "topic_check");
}
