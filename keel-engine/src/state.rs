//! Run state, run configuration and run results.

use std::sync::Arc;

use keel_guardrail::{Guardrail, GuardrailService, GuardrailServiceConfig};
use keel_types::{
    EventSink, Interruption, Message, ModelProvider, NoopSink, Outcome, Role, RunId, TraceId,
};
use tokio_util::sync::CancellationToken;

use crate::agent::AgentRegistry;

/// Default turn budget.
pub const DEFAULT_MAX_TURNS: u32 = 50;

/// Everything the engine knows about one run.
///
/// The engine owns the state for the duration of a run and hands the final
/// snapshot back in [`RunResult`]; `messages` only ever grows.
pub struct RunState<Ctx> {
    /// Run id.
    pub run_id: RunId,
    /// Trace correlation id.
    pub trace_id: TraceId,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Agent that takes the next turn.
    pub current_agent_name: String,
    /// Caller-supplied context, shared read-only with instructions and tools.
    pub context: Arc<Ctx>,
    /// Turns taken so far.
    pub turn_count: u32,
    /// Tool calls waiting for external input. Empty unless the run was
    /// interrupted.
    pub pending_interruptions: Vec<Interruption>,
}

impl<Ctx> RunState<Ctx> {
    /// Fresh state with one user message.
    pub fn new(agent_name: impl Into<String>, context: Ctx, input: impl Into<String>) -> Self {
        Self::from_messages(agent_name, Arc::new(context), vec![Message::user(input)])
    }

    /// Fresh state over an existing conversation, e.g. one loaded from
    /// storage.
    pub fn from_messages(
        agent_name: impl Into<String>,
        context: Arc<Ctx>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            run_id: RunId::generate(),
            trace_id: TraceId::generate(),
            messages,
            current_agent_name: agent_name.into(),
            context,
            turn_count: 0,
            pending_interruptions: Vec::new(),
        }
    }

    /// Use specific ids instead of generated ones.
    #[must_use]
    pub fn with_ids(mut self, run_id: RunId, trace_id: TraceId) -> Self {
        self.run_id = run_id;
        self.trace_id = trace_id;
        self
    }

    /// Text of the first user message.
    pub fn first_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

impl<Ctx> Clone for RunState<Ctx> {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id.clone(),
            trace_id: self.trace_id.clone(),
            messages: self.messages.clone(),
            current_agent_name: self.current_agent_name.clone(),
            context: self.context.clone(),
            turn_count: self.turn_count,
            pending_interruptions: self.pending_interruptions.clone(),
        }
    }
}

impl<Ctx> std::fmt::Debug for RunState<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("run_id", &self.run_id)
            .field("trace_id", &self.trace_id)
            .field("messages", &self.messages.len())
            .field("current_agent_name", &self.current_agent_name)
            .field("turn_count", &self.turn_count)
            .field("pending_interruptions", &self.pending_interruptions)
            .finish_non_exhaustive()
    }
}

/// Per-run configuration. Read-only while the run executes.
///
/// Cloning is cheap; the registry, provider, sink and guardrail service are
/// shared.
pub struct RunConfig<Ctx> {
    agents: Arc<AgentRegistry<Ctx>>,
    provider: Arc<dyn ModelProvider>,
    max_turns: u32,
    default_fast_model: Option<String>,
    input_guardrails: Vec<Arc<dyn Guardrail>>,
    output_guardrails: Vec<Arc<dyn Guardrail>>,
    sink: Arc<dyn EventSink>,
    model_override: Option<String>,
    guardrail_service: Arc<GuardrailService>,
    cancellation: CancellationToken,
}

impl<Ctx> RunConfig<Ctx> {
    /// Configuration with defaults: 50 turns, no run-level guardrails, a
    /// no-op sink and a private guardrail service evaluating with `provider`.
    ///
    /// Share one [`GuardrailService`] across runs with
    /// [`with_guardrail_service`](Self::with_guardrail_service) so they share
    /// its cache and circuit breakers.
    pub fn new(agents: impl Into<Arc<AgentRegistry<Ctx>>>, provider: Arc<dyn ModelProvider>) -> Self {
        let guardrail_service = Arc::new(GuardrailService::new(
            provider.clone(),
            GuardrailServiceConfig::default(),
        ));
        Self {
            agents: agents.into(),
            provider,
            max_turns: DEFAULT_MAX_TURNS,
            default_fast_model: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            sink: Arc::new(NoopSink),
            model_override: None,
            guardrail_service,
            cancellation: CancellationToken::new(),
        }
    }

    /// Turn budget.
    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Model for LLM guardrails whose agent does not name one.
    #[must_use]
    pub fn with_default_fast_model(mut self, model: impl Into<String>) -> Self {
        self.default_fast_model = Some(model.into());
        self
    }

    /// Add a run-level input guardrail.
    #[must_use]
    pub fn with_input_guardrail<G: Guardrail + 'static>(mut self, guardrail: G) -> Self {
        self.input_guardrails.push(Arc::new(guardrail));
        self
    }

    /// Add a run-level output guardrail.
    #[must_use]
    pub fn with_output_guardrail<G: Guardrail + 'static>(mut self, guardrail: G) -> Self {
        self.output_guardrails.push(Arc::new(guardrail));
        self
    }

    /// Event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Model used for every agent in this run.
    #[must_use]
    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// Shared guardrail service.
    #[must_use]
    pub fn with_guardrail_service(mut self, service: Arc<GuardrailService>) -> Self {
        self.guardrail_service = service;
        self
    }

    /// Token the caller cancels to abort the run.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Agent registry.
    pub fn agents(&self) -> &AgentRegistry<Ctx> {
        &self.agents
    }

    /// Model provider.
    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Turn budget.
    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Default guardrail model.
    pub fn default_fast_model(&self) -> Option<&str> {
        self.default_fast_model.as_deref()
    }

    /// Run-level input guardrails.
    pub fn input_guardrails(&self) -> &[Arc<dyn Guardrail>] {
        &self.input_guardrails
    }

    /// Run-level output guardrails.
    pub fn output_guardrails(&self) -> &[Arc<dyn Guardrail>] {
        &self.output_guardrails
    }

    /// Event sink.
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Model override.
    pub fn model_override(&self) -> Option<&str> {
        self.model_override.as_deref()
    }

    /// Guardrail service.
    pub fn guardrail_service(&self) -> &Arc<GuardrailService> {
        &self.guardrail_service
    }

    /// Cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl<Ctx> Clone for RunConfig<Ctx> {
    fn clone(&self) -> Self {
        Self {
            agents: self.agents.clone(),
            provider: self.provider.clone(),
            max_turns: self.max_turns,
            default_fast_model: self.default_fast_model.clone(),
            input_guardrails: self.input_guardrails.clone(),
            output_guardrails: self.output_guardrails.clone(),
            sink: self.sink.clone(),
            model_override: self.model_override.clone(),
            guardrail_service: self.guardrail_service.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

/// Final state plus the terminal outcome.
#[derive(Debug)]
pub struct RunResult<Ctx> {
    /// State when the run stopped, ready to persist.
    pub final_state: RunState<Ctx>,
    /// How the run ended.
    pub outcome: Outcome,
}
