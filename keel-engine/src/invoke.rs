//! Tool invocation: lookup, argument validation, execution.

use keel_tool::{ToolContext, ToolError, ToolRegistry, ToolResult, validate_arguments};
use keel_types::ToolCall;
use serde_json::{Value, json};

/// Parse a call's raw argument text.
pub fn parse_arguments(call: &ToolCall) -> Result<Value, ToolError> {
    call.parse_arguments()
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}

/// Look up `name`, validate `args` against its parameters and execute it.
///
/// Execution races the context's cancellation token.
pub async fn invoke_tool<Ctx: Send + Sync + 'static>(
    tools: &ToolRegistry<Ctx>,
    name: &str,
    args: Value,
    ctx: &ToolContext<Ctx>,
) -> Result<ToolResult, ToolError> {
    let tool = tools
        .get(name)
        .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
    validate_arguments(&args, &tool.schema().parameters)
        .map_err(|v| ToolError::InvalidArguments(v.to_string()))?;

    tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => Err(ToolError::Cancelled),
        result = tool.execute(args, ctx) => result,
    }
}

/// Tool-result content describing a failed call, so the model can correct
/// itself.
pub fn error_content(tool_name: &str, err: &ToolError) -> String {
    json!({
        "error": err.code(),
        "message": err.to_string(),
        "tool_name": tool_name,
    })
    .to_string()
}

/// Merge resume input into a paused call's arguments. Object input
/// overrides keys; anything else lands under `"input"`.
pub fn merge_resume_input(args: Value, input: Value) -> Value {
    let mut merged = match args {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    match input {
        Value::Object(extra) => merged.extend(extra),
        other => {
            merged.insert("input".to_string(), other);
        }
    }
    Value::Object(merged)
}
