//! The model-completion boundary.
//!
//! [`ModelProvider`] is object-safe (`async_trait`) because a single provider
//! is shared by every agent in a registry and by the guardrail evaluator.
//! Vendor integrations live outside this workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{RunId, TraceId};
use crate::message::{Message, ToolCall};

/// Errors from model providers.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP or network request failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Provider rate-limited the request.
    #[error("rate limited")]
    RateLimited,

    /// Authentication/authorization failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// Could not parse the provider's response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    /// Whether retrying this request might succeed.
    ///
    /// The engine never retries; this is for callers that wrap a run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::RequestFailed(_)
        )
    }
}

/// Tool description offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (unique within an agent).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A single completion request, assembled by the engine from the run state,
/// the current agent and the run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Run being served (`None` for guardrail evaluations).
    pub run_id: Option<RunId>,
    /// Trace correlation id.
    pub trace_id: Option<TraceId>,
    /// Name of the agent the request is made for.
    pub agent_name: String,
    /// Model to use (`None` = provider default).
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum output tokens.
    pub max_tokens: Option<u32>,
    /// System instructions.
    pub instructions: String,
    /// Full conversation so far.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolSchema>,
    /// JSON Schema the final answer must satisfy, if the agent declares one.
    pub response_schema: Option<serde_json::Value>,
}

/// The assistant message returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Text content, if any.
    pub content: Option<String>,
    /// Tool calls, in issuance order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    /// A text-only reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A reply that only calls tools.
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    /// Convert into a conversation message.
    pub fn into_message(self) -> Message {
        Message::assistant_with_tools(self.content.unwrap_or_default(), self.tool_calls)
    }
}

/// Trim model text and strip one surrounding Markdown code fence, with or
/// without a language tag.
///
/// ```
/// use keel_types::strip_code_fence;
///
/// assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), r#"{"a": 1}"#);
/// assert_eq!(strip_code_fence("  plain  "), "plain");
/// ```
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map_or("", |(_, body)| body);
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}

/// Token usage from a single provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub prompt_tokens: u64,
    /// Output tokens generated.
    pub completion_tokens: u64,
    /// Total tokens.
    pub total_tokens: u64,
}

/// Response from a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The model's reply.
    pub message: AssistantMessage,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

/// Model-completion provider.
///
/// May fail with a provider-specific error. The engine surfaces the failure
/// as a fatal `ModelProviderError` and never retries internally. Wall-clock
/// limits on the call are the provider's responsibility.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Produce the next assistant message for `request`.
    async fn complete(&self, request: CompletionRequest)
    -> Result<CompletionResponse, ProviderError>;
}
