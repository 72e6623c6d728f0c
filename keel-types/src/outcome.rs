//! Terminal results of a run and the validation result shared by guardrails.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::GuardrailStage;
use crate::id::SessionId;

/// Result of validating a piece of content against a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Content is acceptable.
    Valid,
    /// Content violates the rule.
    Invalid {
        /// Human-readable reason.
        error_message: String,
    },
}

impl ValidationResult {
    /// Shorthand for [`ValidationResult::Invalid`].
    pub fn invalid(error_message: impl Into<String>) -> Self {
        Self::Invalid {
            error_message: error_message.into(),
        }
    }

    /// Returns `true` for [`ValidationResult::Valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The violation message, if any.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid { error_message } => Some(error_message),
        }
    }
}

/// A tool call paused because it needs externally supplied input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    /// The paused tool call.
    pub tool_call_id: String,
    /// Name of the paused tool.
    pub tool_name: String,
    /// Agent whose turn issued the call.
    pub agent_name: String,
    /// External session the caller must complete (e.g. an OAuth flow).
    pub session_id: SessionId,
    /// Shape of the input the caller must provide, as the tool described it.
    pub required_input: serde_json::Value,
}

/// Fatal run errors. Each maps to a stable [`ErrorKind`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// `current_agent_name` did not resolve in the registry.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// The model provider failed. Not retried by the engine.
    #[error("model provider error: {0}")]
    ModelProvider(String),

    /// The final output failed the agent's output codec.
    #[error("output decode failed: {0}")]
    Decode(String),

    /// An input or output guardrail rejected the content.
    #[error("{stage} guardrail violation: {message}")]
    GuardrailViolation {
        /// Which side of the run was rejected.
        stage: GuardrailStage,
        /// The guardrail's message.
        message: String,
    },

    /// The turn budget ran out.
    #[error("max turns exceeded ({0})")]
    MaxTurnsExceeded(u32),

    /// The model returned neither content nor tool calls.
    #[error("model behavior error: {0}")]
    ModelBehavior(String),

    /// The caller cancelled the run.
    #[error("run cancelled")]
    Cancelled,

    /// A resume request did not match any pending interruption.
    #[error("invalid resume: {0}")]
    InvalidResume(String),
}

/// Stable, serializable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// See [`RunError::AgentNotFound`].
    AgentNotFound,
    /// See [`RunError::ModelProvider`].
    ModelProviderError,
    /// See [`RunError::Decode`].
    DecodeError,
    /// See [`RunError::GuardrailViolation`].
    GuardrailViolation,
    /// See [`RunError::MaxTurnsExceeded`].
    MaxTurnsExceeded,
    /// See [`RunError::ModelBehavior`].
    ModelBehaviorError,
    /// See [`RunError::Cancelled`].
    Cancelled,
    /// See [`RunError::InvalidResume`].
    InvalidResume,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentNotFound => "AgentNotFound",
            Self::ModelProviderError => "ModelProviderError",
            Self::DecodeError => "DecodeError",
            Self::GuardrailViolation => "GuardrailViolation",
            Self::MaxTurnsExceeded => "MaxTurnsExceeded",
            Self::ModelBehaviorError => "ModelBehaviorError",
            Self::Cancelled => "Cancelled",
            Self::InvalidResume => "InvalidResume",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentNotFound(_) => ErrorKind::AgentNotFound,
            Self::ModelProvider(_) => ErrorKind::ModelProviderError,
            Self::Decode(_) => ErrorKind::DecodeError,
            Self::GuardrailViolation { .. } => ErrorKind::GuardrailViolation,
            Self::MaxTurnsExceeded(_) => ErrorKind::MaxTurnsExceeded,
            Self::ModelBehavior(_) => ErrorKind::ModelBehaviorError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidResume(_) => ErrorKind::InvalidResume,
        }
    }
}

/// The terminal result of a run. A run produces exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The model produced an output that passed decoding and output guardrails.
    Completed {
        /// Decoded output, or the raw text as a JSON string.
        output: serde_json::Value,
    },
    /// The run failed fatally.
    Error(RunError),
    /// A tool asked for external input; the run is paused.
    Interrupted {
        /// The paused calls.
        interruptions: Vec<Interruption>,
    },
}

impl Outcome {
    /// Returns `true` for [`Outcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The error kind, for [`Outcome::Error`].
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Short status label used in logs and `run_end` events.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Error(_) => "error",
            Self::Interrupted { .. } => "interrupted",
        }
    }
}
