//! Trace events and the fire-and-forget sinks that receive them.
//!
//! The engine emits an [`EventRecord`] at every state transition. Sinks are
//! synchronous and must return quickly; run correctness never depends on
//! what a sink does with a record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::id::{RunId, TraceId};
use crate::outcome::ErrorKind;
use crate::provider::TokenUsage;

/// Which side of a run a guardrail protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    /// The first user message, checked before any model call.
    Input,
    /// The candidate final output.
    Output,
}

impl GuardrailStage {
    /// Lowercase stage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for GuardrailStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `guardrail_check` event precedes or follows the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailPhase {
    /// Emitted before the guardrail runs.
    Start,
    /// Emitted after the guardrail returned (or degraded).
    End,
}

/// How a tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// The tool returned a result.
    Success,
    /// The tool failed; the error was fed back to the model.
    Error,
}

/// Everything the engine reports while driving a run.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// The run started (also emitted on resume).
    RunStart {
        /// Agent the run starts in.
        agent_name: String,
    },
    /// A turn started.
    TurnStart {
        /// 1-based turn number.
        turn: u32,
        /// Agent serving the turn.
        agent_name: String,
    },
    /// The agent was resolved and is assembling its request.
    AgentProcessing {
        /// 1-based turn number.
        turn: u32,
        /// Agent serving the turn.
        agent_name: String,
        /// Messages in the conversation.
        message_count: usize,
        /// Tools offered to the model.
        tool_count: usize,
    },
    /// About to call the model provider.
    LlmCallStart {
        /// Agent serving the turn.
        agent_name: String,
        /// Resolved model.
        model: Option<String>,
        /// Messages sent.
        message_count: usize,
    },
    /// The model provider returned.
    LlmCallEnd {
        /// Agent serving the turn.
        agent_name: String,
        /// Number of tool calls in the reply.
        tool_call_count: usize,
    },
    /// Token usage reported by the provider.
    TokenUsage {
        /// Reported usage.
        usage: TokenUsage,
    },
    /// A tool call is about to execute.
    ToolCallStart {
        /// Call id.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Parsed arguments.
        args: serde_json::Value,
    },
    /// A tool call finished.
    ToolCallEnd {
        /// Call id.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// How it ended.
        status: ToolCallStatus,
        /// Text fed back to the model.
        result: String,
        /// Whether the tool asked to escalate.
        escalate: bool,
        /// Metadata attached to a structured result. Never sent to the model.
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    /// Control moved to another agent.
    Handoff {
        /// Previous agent.
        from: String,
        /// New agent.
        to: String,
    },
    /// A handoff was refused by policy.
    HandoffDenied {
        /// Requesting agent.
        from: String,
        /// Requested target.
        to: String,
        /// Why it was refused.
        reason: String,
    },
    /// A guardrail is about to run or just ran.
    GuardrailCheck {
        /// Input or output.
        stage: GuardrailStage,
        /// Guardrail name.
        guardrail: String,
        /// Before or after.
        phase: GuardrailPhase,
        /// Result, on [`GuardrailPhase::End`].
        passed: Option<bool>,
    },
    /// A guardrail rejected the content; the run ends.
    GuardrailViolation {
        /// Input or output.
        stage: GuardrailStage,
        /// The guardrail's message.
        reason: String,
    },
    /// The final output failed the agent's codec.
    DecodeError {
        /// Agent that produced the output.
        agent_name: String,
        /// Decoder message.
        error: String,
    },
    /// A turn finished its tool phase.
    TurnEnd {
        /// 1-based turn number.
        turn: u32,
    },
    /// The run reached a terminal outcome.
    RunEnd {
        /// `completed`, `error` or `interrupted`.
        status: String,
        /// Error kind, for failed runs.
        error_kind: Option<ErrorKind>,
    },
}

impl TraceEvent {
    /// The `type` tag this event serializes with.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run_start",
            Self::TurnStart { .. } => "turn_start",
            Self::AgentProcessing { .. } => "agent_processing",
            Self::LlmCallStart { .. } => "llm_call_start",
            Self::LlmCallEnd { .. } => "llm_call_end",
            Self::TokenUsage { .. } => "token_usage",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::Handoff { .. } => "handoff",
            Self::HandoffDenied { .. } => "handoff_denied",
            Self::GuardrailCheck { .. } => "guardrail_check",
            Self::GuardrailViolation { .. } => "guardrail_violation",
            Self::DecodeError { .. } => "decode_error",
            Self::TurnEnd { .. } => "turn_end",
            Self::RunEnd { .. } => "run_end",
        }
    }
}

/// A trace event stamped with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Trace correlation id.
    pub trace_id: TraceId,
    /// The event itself.
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Observer receiving every [`EventRecord`] of a run.
///
/// Called inline; implementations must not block. Hand records to a channel
/// (see [`ChannelSink`]) when real work is needed.
pub trait EventSink: Send + Sync {
    /// Observe one record.
    fn on_event(&self, record: &EventRecord);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_event(&self, _record: &EventRecord) {}
}

/// Sink backed by a closure.
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(&EventRecord) + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventSink for FnSink<F>
where
    F: Fn(&EventRecord) + Send + Sync,
{
    fn on_event(&self, record: &EventRecord) {
        (self.0)(record)
    }
}

/// Sink that forwards records over an unbounded channel.
///
/// Sending never blocks. Records are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EventRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver draining it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, record: &EventRecord) {
        if self.tx.send(record.clone()).is_err() {
            tracing::trace!("keel.event.receiver_dropped");
        }
    }
}

/// Stamps events with run/trace ids and hands them to a sink.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
    run_id: RunId,
    trace_id: TraceId,
}

impl Emitter {
    /// Create an emitter for one run.
    pub fn new(sink: Arc<dyn EventSink>, run_id: RunId, trace_id: TraceId) -> Self {
        Self {
            sink,
            run_id,
            trace_id,
        }
    }

    /// Emitter that discards everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink), RunId::new(""), TraceId::new(""))
    }

    /// Emit one event.
    pub fn emit(&self, event: TraceEvent) {
        self.sink.on_event(&EventRecord {
            run_id: self.run_id.clone(),
            trace_id: self.trace_id.clone(),
            event,
        });
    }

    /// Run this emitter stamps records with.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("run_id", &self.run_id)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn record_serializes_with_type_tag() {
        let record = EventRecord {
            run_id: RunId::new("r1"),
            trace_id: TraceId::new("t1"),
            event: TraceEvent::HandoffDenied {
                from: "triage".into(),
                to: "billing".into(),
                reason: "not allowed".into(),
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "handoff_denied");
        assert_eq!(value["run_id"], "r1");
        assert_eq!(value["to"], "billing");
    }

    #[test]
    fn type_name_matches_serde_tag() {
        let event = TraceEvent::GuardrailCheck {
            stage: GuardrailStage::Input,
            guardrail: "citations".into(),
            phase: GuardrailPhase::Start,
            passed: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.type_name());
    }

    #[test]
    fn emitter_stamps_ids() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink = FnSink::new(move |r: &EventRecord| {
            sink_seen.lock().unwrap().push(r.clone());
        });
        let emitter = Emitter::new(Arc::new(sink), RunId::new("r"), TraceId::new("t"));
        emitter.emit(TraceEvent::TurnEnd { turn: 1 });
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].run_id.as_str(), "r");
        assert_eq!(seen[0].event.type_name(), "turn_end");
    }

    #[tokio::test]
    async fn channel_sink_forwards_records() {
        let (sink, mut rx) = ChannelSink::new();
        let emitter = Emitter::new(Arc::new(sink), RunId::new("r"), TraceId::new("t"));
        emitter.emit(TraceEvent::RunStart {
            agent_name: "a".into(),
        });
        let record = rx.recv().await.unwrap();
        assert_eq!(record.event.type_name(), "run_start");
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let emitter = Emitter::new(Arc::new(sink), RunId::new("r"), TraceId::new("t"));
        emitter.emit(TraceEvent::TurnEnd { turn: 1 });
    }
}
