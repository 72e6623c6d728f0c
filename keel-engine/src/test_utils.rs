//! Test doubles: a scripted provider, a recording sink and an echo tool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use keel_tool::{Tool, ToolContext, ToolError, ToolResult};
use keel_types::{
    AssistantMessage, CompletionRequest, CompletionResponse, EventRecord, EventSink,
    ModelProvider, ProviderError, ToolCall, ToolSchema, TraceEvent,
};
use serde_json::json;

/// A reply that carries only text.
pub fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        message: AssistantMessage::text(text),
        usage: None,
    }
}

/// A reply that carries only tool calls, given as `(id, name, arguments)`.
pub fn tool_call_response(calls: &[(&str, &str, serde_json::Value)]) -> CompletionResponse {
    CompletionResponse {
        message: AssistantMessage::tool_calls(
            calls
                .iter()
                .map(|(id, name, args)| ToolCall::new(*id, *name, args.to_string()))
                .collect(),
        ),
        usage: None,
    }
}

/// Provider that replays queued replies and records every request.
///
/// Once the queue is empty it repeats the fallback reply if one was set,
/// otherwise it fails with [`ProviderError::InvalidResponse`].
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    fallback: Option<CompletionResponse>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    /// Replay `replies` in order.
    pub fn new(replies: Vec<CompletionResponse>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    /// Replay replies and errors in order.
    pub fn with_results(replies: Vec<Result<CompletionResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Return `reply` on every call.
    pub fn repeating(reply: CompletionResponse) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.fallback = Some(reply);
        provider
    }

    /// Calls made so far.
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let next = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(ProviderError::InvalidResponse(
                "scripted provider has no more replies".into(),
            )),
        }
    }
}

/// Sink that keeps every record.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<EventRecord>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, in order.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.event.clone())
            .collect()
    }

    /// `type` tags of recorded events, in order.
    pub fn types(&self) -> Vec<&'static str> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.event.type_name())
            .collect()
    }

    /// Number of recorded events with tag `type_name`.
    pub fn count(&self, type_name: &str) -> usize {
        self.types().into_iter().filter(|t| *t == type_name).count()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, record: &EventRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

/// Tool named `echo` that returns its `text` argument.
pub struct EchoTool {
    schema: ToolSchema,
}

impl EchoTool {
    /// Create the tool.
    pub fn new() -> Self {
        Self {
            schema: ToolSchema {
                name: "echo".into(),
                description: "Echo the given text back.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            },
        }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Ctx: Send + Sync + 'static> Tool<Ctx> for EchoTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext<Ctx>,
    ) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::plain(args["text"].clone()))
    }
}
