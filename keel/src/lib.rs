#![deny(missing_docs)]
//! # keel — turn-based agent runtime
//!
//! Single import surface for the keel crates:
//!
//! | Crate | What it does |
//! |-------|--------------|
//! | [`types`] | messages, outcomes, trace events, the model provider boundary |
//! | [`tool`] | the tool protocol and argument validation |
//! | [`guardrail`] | cached, circuit-broken, timeboxed LLM guardrails |
//! | [`engine`] | agents, run state/config, the turn loop |
//!
//! ```ignore
//! use keel::prelude::*;
//!
//! let agents = AgentRegistry::new().with(Agent::new("assistant").with_instructions("Be brief."));
//! let config = RunConfig::new(agents, provider).with_sink(Arc::new(TracingSink));
//! let result = run(RunState::new("assistant", (), "2+2"), &config).await;
//! ```

pub use keel_engine as engine;
pub use keel_guardrail as guardrail;
pub use keel_tool as tool;
pub use keel_types as types;

/// Happy-path imports.
pub mod prelude {
    pub use keel_types::{
        ChannelSink, CompletionRequest, CompletionResponse, DurationMs, ErrorKind, EventRecord,
        EventSink, FnSink, Interruption, Message, ModelProvider, NoopSink, Outcome, ProviderError,
        Role, RunError, RunId, SessionId, ToolCall, TraceEvent, TraceId, ValidationResult,
    };

    pub use keel_tool::{
        FnTool, Tool, ToolActions, ToolContext, ToolError, ToolResult, ToolSchema,
    };

    pub use keel_guardrail::{
        AdvancedGuardrailConfig, CitationGuardrail, ExecutionMode, FailSafe, FnGuardrail,
        Guardrail, GuardrailService, GuardrailServiceConfig, LlmRuleGuardrail,
    };

    pub use keel_engine::{
        Agent, AgentRegistry, JsonSchemaCodec, ModelConfig, OutputCodec, ResumeRequest,
        RunConfig, RunResult, RunState, TracingSink, TypedCodec, resume, run,
    };
}
