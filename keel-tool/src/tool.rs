//! The [`Tool`] trait and the values tools hand back to the engine.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use keel_types::{RunId, SessionId, ToolSchema, TraceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from tool lookup, validation and execution.
///
/// None of these end a run: the engine turns them into a tool-result
/// message so the model can correct itself.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// No tool with this name is registered on the agent.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Arguments were not valid JSON or did not match the parameter shape.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The run was cancelled while the tool was executing.
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Short machine-readable code included in the feedback message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "tool_not_found",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Describes input a human (or external system) must supply before a paused
/// tool call can continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequirement {
    /// External session that will produce the input.
    pub session_id: SessionId,
    /// Shape of the expected input (free-form, e.g. a JSON Schema or an
    /// authorization URL descriptor).
    pub spec: serde_json::Value,
}

/// Side-channel actions a structured tool result may request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolActions {
    /// Pause the whole run until the described input is provided.
    pub requires_input: Option<InputRequirement>,
    /// Use this result as the final output without another model call.
    pub skip_summarization: bool,
    /// Ask the caller to escalate. Reported, never acted on by the engine.
    pub escalate: bool,
}

/// What a tool returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// A bare value, stringified for the model.
    Plain(serde_json::Value),
    /// A value plus side-channel actions and metadata.
    Structured {
        /// The value, stringified for the model.
        value: serde_json::Value,
        /// Requested actions.
        actions: ToolActions,
        /// Free-form metadata, reported but not shown to the model.
        metadata: serde_json::Map<String, serde_json::Value>,
    },
}

impl ToolResult {
    /// A plain result.
    pub fn plain(value: impl Into<serde_json::Value>) -> Self {
        Self::Plain(value.into())
    }

    /// A structured result with the given actions and no metadata.
    pub fn with_actions(value: impl Into<serde_json::Value>, actions: ToolActions) -> Self {
        Self::Structured {
            value: value.into(),
            actions,
            metadata: serde_json::Map::new(),
        }
    }

    /// A structured result that pauses the run for external input.
    pub fn requires_input(
        value: impl Into<serde_json::Value>,
        session_id: impl Into<SessionId>,
        spec: serde_json::Value,
    ) -> Self {
        Self::with_actions(
            value,
            ToolActions {
                requires_input: Some(InputRequirement {
                    session_id: session_id.into(),
                    spec,
                }),
                ..Default::default()
            },
        )
    }

    /// The carried value.
    pub fn value(&self) -> &serde_json::Value {
        match self {
            Self::Plain(value) | Self::Structured { value, .. } => value,
        }
    }

    /// Attach metadata, turning a plain result into a structured one.
    #[must_use]
    pub fn with_metadata(self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        match self {
            Self::Plain(value) => Self::Structured {
                value,
                actions: ToolActions::default(),
                metadata,
            },
            Self::Structured { value, actions, .. } => Self::Structured {
                value,
                actions,
                metadata,
            },
        }
    }

    /// Metadata of a structured result.
    pub fn metadata(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Self::Plain(_) => None,
            Self::Structured { metadata, .. } => Some(metadata),
        }
    }

    /// Requested actions, if this is a structured result.
    pub fn actions(&self) -> Option<&ToolActions> {
        match self {
            Self::Plain(_) => None,
            Self::Structured { actions, .. } => Some(actions),
        }
    }

    /// The input requirement, if the result pauses the run.
    pub fn input_requirement(&self) -> Option<&InputRequirement> {
        match self {
            Self::Structured {
                actions:
                    ToolActions {
                        requires_input: Some(requirement),
                        ..
                    },
                ..
            } => Some(requirement),
            _ => None,
        }
    }

    /// Text fed back to the model: strings verbatim, everything else as JSON.
    pub fn to_model_text(&self) -> String {
        match self.value() {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Runtime context handed to a tool.
///
/// The run context is shared read-only; tools communicate back only through
/// [`ToolResult`].
pub struct ToolContext<Ctx> {
    /// Caller-supplied run context.
    pub context: Arc<Ctx>,
    /// Run being served.
    pub run_id: RunId,
    /// Trace correlation id.
    pub trace_id: TraceId,
    /// Agent that issued the call.
    pub agent_name: String,
    /// Id of the call being executed.
    pub tool_call_id: String,
    /// Cancelled when the caller aborts the run.
    pub cancellation: CancellationToken,
}

impl<Ctx> Clone for ToolContext<Ctx> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            run_id: self.run_id.clone(),
            trace_id: self.trace_id.clone(),
            agent_name: self.agent_name.clone(),
            tool_call_id: self.tool_call_id.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

/// An executable tool.
///
/// Object-safe so agents can hold heterogeneous tools in a
/// [`ToolRegistry`](crate::ToolRegistry).
#[async_trait]
pub trait Tool<Ctx: Send + Sync + 'static>: Send + Sync {
    /// Name, description and parameter shape.
    fn schema(&self) -> &ToolSchema;

    /// Execute with already-validated arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext<Ctx>,
    ) -> Result<ToolResult, ToolError>;
}

type ToolFn<Ctx> = dyn Fn(serde_json::Value, ToolContext<Ctx>) -> BoxFuture<'static, Result<ToolResult, ToolError>>
    + Send
    + Sync;

/// A tool backed by a closure returning a boxed future.
///
/// ```ignore
/// let lookup = FnTool::new(schema, |args, _ctx| {
///     Box::pin(async move { Ok(ToolResult::plain(args["id"].clone())) })
/// });
/// ```
pub struct FnTool<Ctx> {
    schema: ToolSchema,
    f: Box<ToolFn<Ctx>>,
}

impl<Ctx: Send + Sync + 'static> FnTool<Ctx> {
    /// Wrap a closure as a tool.
    pub fn new<F>(schema: ToolSchema, f: F) -> Self
    where
        F: Fn(serde_json::Value, ToolContext<Ctx>) -> BoxFuture<'static, Result<ToolResult, ToolError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            schema,
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl<Ctx: Send + Sync + 'static> Tool<Ctx> for FnTool<Ctx> {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext<Ctx>,
    ) -> Result<ToolResult, ToolError> {
        (self.f)(args, ctx.clone()).await
    }
}
