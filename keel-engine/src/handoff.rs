//! Handoff policy and the reserved handoff tool.

use keel_tool::ToolError;
use keel_types::{ToolCall, ToolSchema};
use serde::Deserialize;
use serde_json::json;

use crate::agent::Agent;

/// Name of the reserved tool the model calls to transfer control.
pub const HANDOFF_TOOL_NAME: &str = "handoff_to_agent";

/// `allowed(from, to) = to ∈ from.handoffs`.
pub fn handoff_allowed<Ctx>(from: &Agent<Ctx>, to: &str) -> bool {
    from.handoffs().contains(to)
}

/// Schema of the handoff tool offered to an agent with handoff targets.
pub fn handoff_tool_schema<Ctx>(agent: &Agent<Ctx>) -> ToolSchema {
    let mut targets: Vec<&str> = agent.handoffs().iter().map(String::as_str).collect();
    targets.sort_unstable();
    ToolSchema {
        name: HANDOFF_TOOL_NAME.to_string(),
        description: "Transfer the conversation to another agent better suited to handle it."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "enum": targets,
                    "description": "Agent to transfer to."
                },
                "message": {
                    "type": "string",
                    "description": "Optional note for the receiving agent."
                }
            },
            "required": ["agent_name"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct HandoffArgs {
    agent_name: String,
    #[serde(default)]
    message: Option<String>,
}

/// Outcome of a handoff request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffDecision {
    /// Transfer approved.
    Approved {
        /// Target agent.
        to: String,
        /// Note for the target, if given.
        message: Option<String>,
    },
    /// Target is not in the issuing agent's allow-list.
    Denied {
        /// Requested target.
        to: String,
        /// Why.
        reason: String,
    },
}

/// Check a handoff call against the issuing agent's allow-list.
///
/// Malformed arguments are a recoverable [`ToolError::InvalidArguments`].
pub fn decide<Ctx>(from: &Agent<Ctx>, call: &ToolCall) -> Result<HandoffDecision, ToolError> {
    let args: HandoffArgs = serde_json::from_str(call.arguments.trim())
        .map_err(|e| ToolError::InvalidArguments(format!("handoff arguments: {e}")))?;
    if handoff_allowed(from, &args.agent_name) {
        Ok(HandoffDecision::Approved {
            to: args.agent_name,
            message: args.message,
        })
    } else {
        let reason = format!(
            "agent '{}' is not allowed to hand off to '{}'",
            from.name(),
            args.agent_name
        );
        Ok(HandoffDecision::Denied {
            to: args.agent_name,
            reason,
        })
    }
}
