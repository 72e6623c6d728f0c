//! Per-`(stage, model)` circuit breakers.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use keel_types::GuardrailStage;
use tokio::time::Instant;

#[derive(Debug)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
    last_activity: Instant,
}

/// Failure counters for each `(stage, model)` pair.
///
/// A breaker opens once `threshold` consecutive failures have been recorded
/// and stays open until `reset` has passed since the last failure, after
/// which the next attempt is let through. Any success closes it again.
#[derive(Debug)]
pub struct CircuitBreakers {
    states: Mutex<HashMap<(GuardrailStage, String), BreakerState>>,
    threshold: u32,
    reset: Duration,
    idle_gc: Duration,
}

impl CircuitBreakers {
    /// Create an empty set of breakers.
    pub fn new(threshold: u32, reset: Duration, idle_gc: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            threshold: threshold.max(1),
            reset,
            idle_gc,
        }
    }

    /// Whether calls for this pair should be short-circuited.
    pub fn is_open(&self, stage: GuardrailStage, model: &str) -> bool {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = states.get_mut(&(stage, model.to_string())) else {
            return false;
        };
        if state.failures < self.threshold {
            return false;
        }
        match state.last_failure {
            Some(at) if now.duration_since(at) < self.reset => true,
            _ => {
                state.failures = 0;
                state.last_activity = now;
                false
            }
        }
    }

    /// Record a successful evaluation.
    pub fn record_success(&self, stage: GuardrailStage, model: &str) {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry((stage, model.to_string()))
            .or_insert_with(|| BreakerState {
                failures: 0,
                last_failure: None,
                last_activity: now,
            });
        state.failures = 0;
        state.last_activity = now;
        self.collect_idle(&mut states, now);
    }

    /// Record a failed evaluation.
    pub fn record_failure(&self, stage: GuardrailStage, model: &str) {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry((stage, model.to_string()))
            .or_insert_with(|| BreakerState {
                failures: 0,
                last_failure: None,
                last_activity: now,
            });
        state.failures += 1;
        state.last_failure = Some(now);
        state.last_activity = now;
        if state.failures == self.threshold {
            tracing::warn!(
                stage = %stage,
                model,
                failures = state.failures,
                "keel.guardrail.circuit_opened"
            );
        }
        self.collect_idle(&mut states, now);
    }

    /// Number of tracked pairs.
    pub fn len(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no pair is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect_idle(
        &self,
        states: &mut HashMap<(GuardrailStage, String), BreakerState>,
        now: Instant,
    ) {
        states.retain(|_, s| {
            s.failures >= self.threshold || now.duration_since(s.last_activity) < self.idle_gc
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakers() -> CircuitBreakers {
        CircuitBreakers::new(5, Duration::from_secs(60), Duration::from_secs(600))
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_resets_after_window() {
        let b = breakers();
        for _ in 0..4 {
            b.record_failure(GuardrailStage::Input, "fast");
        }
        assert!(!b.is_open(GuardrailStage::Input, "fast"));
        b.record_failure(GuardrailStage::Input, "fast");
        assert!(b.is_open(GuardrailStage::Input, "fast"));
        assert!(!b.is_open(GuardrailStage::Output, "fast"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(b.is_open(GuardrailStage::Input, "fast"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!b.is_open(GuardrailStage::Input, "fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_closes() {
        let b = breakers();
        for _ in 0..4 {
            b.record_failure(GuardrailStage::Output, "fast");
        }
        b.record_success(GuardrailStage::Output, "fast");
        b.record_failure(GuardrailStage::Output, "fast");
        assert!(!b.is_open(GuardrailStage::Output, "fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_closed_entries_are_collected() {
        let b = breakers();
        b.record_success(GuardrailStage::Input, "a");
        tokio::time::advance(Duration::from_secs(601)).await;
        b.record_success(GuardrailStage::Input, "b");
        assert_eq!(b.len(), 1);
    }
}
