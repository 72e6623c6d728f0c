//! [`TracingSink`]: trace events as `tracing` events.

use keel_types::{EventRecord, EventSink, TraceEvent};

/// Maps every trace event to a structured `tracing` event.
///
/// Per-turn detail is DEBUG, run boundaries and handoffs are INFO, and
/// violations, denials and decode failures are WARN.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, record: &EventRecord) {
        let run_id = record.run_id.as_str();
        match &record.event {
            TraceEvent::RunStart { agent_name } => {
                tracing::info!(run_id, agent = %agent_name, "keel.run.start");
            }
            TraceEvent::TurnStart { turn, agent_name } => {
                tracing::debug!(run_id, turn, agent = %agent_name, "keel.turn.start");
            }
            TraceEvent::AgentProcessing {
                turn,
                agent_name,
                message_count,
                tool_count,
            } => {
                tracing::debug!(
                    run_id,
                    turn,
                    agent = %agent_name,
                    messages = message_count,
                    tools = tool_count,
                    "keel.agent.processing"
                );
            }
            TraceEvent::LlmCallStart {
                agent_name,
                model,
                message_count,
            } => {
                tracing::debug!(
                    run_id,
                    agent = %agent_name,
                    model = model.as_deref().unwrap_or(""),
                    messages = message_count,
                    "keel.llm.pre_call"
                );
            }
            TraceEvent::LlmCallEnd {
                agent_name,
                tool_call_count,
            } => {
                tracing::debug!(
                    run_id,
                    agent = %agent_name,
                    tool_calls = tool_call_count,
                    "keel.llm.post_call"
                );
            }
            TraceEvent::TokenUsage { usage } => {
                tracing::debug!(
                    run_id,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    "keel.llm.usage"
                );
            }
            TraceEvent::ToolCallStart {
                tool_call_id,
                tool_name,
                ..
            } => {
                tracing::debug!(run_id, tool = %tool_name, call = %tool_call_id, "keel.tool.pre_execution");
            }
            TraceEvent::ToolCallEnd {
                tool_call_id,
                tool_name,
                status,
                escalate,
                metadata,
                ..
            } => {
                tracing::debug!(
                    run_id,
                    tool = %tool_name,
                    call = %tool_call_id,
                    status = ?status,
                    escalate,
                    metadata_keys = metadata.len(),
                    "keel.tool.post_execution"
                );
            }
            TraceEvent::Handoff { from, to } => {
                tracing::info!(run_id, from = %from, to = %to, "keel.handoff");
            }
            TraceEvent::HandoffDenied { from, to, reason } => {
                tracing::warn!(run_id, from = %from, to = %to, reason = %reason, "keel.handoff.denied");
            }
            TraceEvent::GuardrailCheck {
                stage,
                guardrail,
                phase,
                passed,
            } => {
                tracing::debug!(
                    run_id,
                    stage = %stage,
                    guardrail = %guardrail,
                    phase = ?phase,
                    passed = ?passed,
                    "keel.guardrail.check"
                );
            }
            TraceEvent::GuardrailViolation { stage, reason } => {
                tracing::warn!(run_id, stage = %stage, reason = %reason, "keel.guardrail.violation");
            }
            TraceEvent::DecodeError { agent_name, error } => {
                tracing::warn!(run_id, agent = %agent_name, error = %error, "keel.output.decode_error");
            }
            TraceEvent::TurnEnd { turn } => {
                tracing::debug!(run_id, turn, "keel.turn.end");
            }
            TraceEvent::RunEnd { status, error_kind } => {
                tracing::info!(
                    run_id,
                    status = %status,
                    error_kind = error_kind.map(|k| k.as_str()).unwrap_or(""),
                    "keel.run.end"
                );
            }
            other => {
                tracing::trace!(run_id, event = other.type_name(), "keel.event");
            }
        }
    }
}
