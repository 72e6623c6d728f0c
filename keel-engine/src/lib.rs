//! # keel-engine — the agent turn loop
//!
//! Drives one conversational run from its initial [`RunState`] to exactly one
//! terminal [`Outcome`](keel_types::Outcome): completed, error or
//! interrupted.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`agent`] | [`Agent`], [`AgentRegistry`], [`ModelConfig`] |
//! | [`codec`] | [`OutputCodec`], [`JsonSchemaCodec`], [`TypedCodec`] |
//! | [`state`] | [`RunState`], [`RunConfig`], [`RunResult`] |
//! | [`handoff`] | handoff policy and the reserved handoff tool |
//! | [`invoke`] | tool lookup, argument validation and execution |
//! | [`engine`] | [`run`], [`resume`] |
//! | [`sink`] | [`TracingSink`] |
//!
//! The engine never retries provider calls and imposes no wall-clock limit
//! on them. Callers abort a run through the [`RunConfig`] cancellation
//! token, which is checked at every turn and raced against the model call
//! and each tool.

#![deny(missing_docs)]

pub mod agent;
pub mod codec;
pub mod engine;
pub mod handoff;
pub mod invoke;
pub mod sink;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use agent::{Agent, AgentRegistry, InstructionsFn, ModelConfig};
pub use codec::{DecodeError, JsonSchemaCodec, OutputCodec, TypedCodec};
pub use engine::{ResumeRequest, resume, run};
pub use handoff::{HANDOFF_TOOL_NAME, HandoffDecision, handoff_allowed};
pub use sink::TracingSink;
pub use state::{DEFAULT_MAX_TURNS, RunConfig, RunResult, RunState};
