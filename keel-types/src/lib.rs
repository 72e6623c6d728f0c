#![deny(missing_docs)]
//! # keel-types — protocol types for the keel agent runtime
//!
//! | Module | What it holds |
//! |--------|---------------|
//! | [`id`] | [`RunId`], [`TraceId`], [`SessionId`] |
//! | [`message`] | [`Message`], [`ToolCall`], [`Role`] |
//! | [`provider`] | [`ModelProvider`], [`CompletionRequest`], [`CompletionResponse`] |
//! | [`outcome`] | [`Outcome`], [`RunError`], [`ErrorKind`], [`ValidationResult`] |
//! | [`event`] | [`TraceEvent`], [`EventSink`], [`Emitter`] |
//!
//! The engine, tool and guardrail crates all speak these types. Nothing
//! here performs I/O except the sinks, which never block.

pub mod duration;
pub mod event;
pub mod id;
pub mod message;
pub mod outcome;
pub mod provider;

pub use duration::DurationMs;
pub use event::{
    ChannelSink, Emitter, EventRecord, EventSink, FnSink, GuardrailPhase, GuardrailStage,
    NoopSink, ToolCallStatus, TraceEvent,
};
pub use id::{RunId, SessionId, TraceId};
pub use message::{Message, Role, ToolCall};
pub use outcome::{ErrorKind, Interruption, Outcome, RunError, ValidationResult};
pub use provider::{
    AssistantMessage, CompletionRequest, CompletionResponse, ModelProvider, ProviderError,
    ToolSchema, TokenUsage, strip_code_fence,
};
