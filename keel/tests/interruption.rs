//! Tools that pause a run for external input, and resuming it.

use std::sync::Arc;

use async_trait::async_trait;
use keel::engine::HANDOFF_TOOL_NAME;
use keel::engine::test_utils::{EchoTool, RecordingSink, ScriptedProvider, text_response, tool_call_response};
use keel::prelude::*;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Needs an authorization code before it can connect.
struct ConnectTool {
    schema: ToolSchema,
}

impl ConnectTool {
    fn new() -> Self {
        Self {
            schema: ToolSchema {
                name: "connect".into(),
                description: "Connect an external account.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "service": {"type": "string"},
                        "code": {"type": "string"}
                    },
                    "required": ["service"]
                }),
            },
        }
    }
}

#[async_trait]
impl Tool<()> for ConnectTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<()>) -> Result<ToolResult, ToolError> {
        match args["code"].as_str() {
            Some(code) => Ok(ToolResult::plain(format!(
                "connected {} with {code}",
                args["service"].as_str().unwrap_or_default()
            ))),
            None => Ok(ToolResult::requires_input(
                json!({"status": "pending"}),
                "oauth-1",
                json!({"type": "object", "properties": {"code": {"type": "string"}}}),
            )),
        }
    }
}

fn agents() -> AgentRegistry<()> {
    AgentRegistry::new().with(
        Agent::new("assistant")
            .with_tool(ConnectTool::new())
            .with_tool(EchoTool::new()),
    )
}

fn first_turn() -> CompletionResponse {
    tool_call_response(&[
        ("c1", "connect", json!({"service": "calendar"})),
        ("c2", "echo", json!({"text": "after"})),
    ])
}

fn resume_request(tool_call_id: &str, session_id: &str) -> ResumeRequest {
    ResumeRequest {
        conversation_id: Some("conv-9".into()),
        session_id: SessionId::new(session_id),
        tool_call_id: tool_call_id.into(),
        input: json!({"code": "xyz"}),
    }
}

#[tokio::test]
async fn input_requirement_pauses_the_run() {
    let provider = Arc::new(ScriptedProvider::new(vec![first_turn(), text_response("never")]));
    let sink = Arc::new(RecordingSink::new());
    let config = RunConfig::new(agents(), provider.clone()).with_sink(sink.clone());

    let result = run(RunState::new("assistant", (), "link my calendar"), &config).await;

    let Outcome::Interrupted { interruptions } = &result.outcome else {
        panic!("expected interruption, got {:?}", result.outcome);
    };
    assert_eq!(interruptions.len(), 1);
    let paused = &interruptions[0];
    assert_eq!(paused.tool_call_id, "c1");
    assert_eq!(paused.tool_name, "connect");
    assert_eq!(paused.agent_name, "assistant");
    assert_eq!(paused.session_id.as_str(), "oauth-1");
    assert_eq!(paused.required_input["properties"]["code"]["type"], "string");

    assert_eq!(&result.final_state.pending_interruptions, interruptions);
    assert_eq!(provider.calls(), 1);
    // the second call never ran and the paused one has no result yet
    assert_eq!(result.final_state.messages.len(), 2);
    assert_eq!(sink.count("tool_call_start"), 1);
    assert_eq!(sink.count("tool_call_end"), 0);
    assert_eq!(sink.types().last(), Some(&"run_end"));
    assert!(sink.events().contains(&TraceEvent::RunEnd {
        status: "interrupted".into(),
        error_kind: None
    }));
}

#[tokio::test]
async fn resume_completes_the_paused_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![first_turn(), text_response("all set")]));
    let config = RunConfig::new(agents(), provider.clone());

    let paused = run(RunState::new("assistant", (), "link my calendar"), &config).await;
    let run_id = paused.final_state.run_id.clone();

    let result = resume(paused.final_state, &config, resume_request("c1", "oauth-1")).await;

    assert_eq!(result.outcome, Outcome::Completed { output: json!("all set") });
    assert_eq!(provider.calls(), 2);

    let state = &result.final_state;
    assert_eq!(state.run_id, run_id);
    assert!(state.pending_interruptions.is_empty());
    assert_eq!(state.turn_count, 2);

    let messages = &state.messages;
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(messages[2].content, "connected calendar with xyz");
    assert_eq!(messages[3].tool_call_id.as_deref(), Some("c2"));
    assert_eq!(messages[3].content, "after");
    assert_eq!(messages[4].role, Role::Assistant);

    // the model sees both tool results on the turn after the resume
    assert_eq!(provider.requests()[1].messages.len(), 4);
}

#[tokio::test]
async fn mismatched_resume_is_rejected() {
    let provider = Arc::new(ScriptedProvider::new(vec![first_turn()]));
    let config = RunConfig::new(agents(), provider.clone());

    let paused = run(RunState::new("assistant", (), "link my calendar"), &config).await;
    let before = paused.final_state.messages.clone();

    let wrong_session = resume(
        paused.final_state.clone(),
        &config,
        resume_request("c1", "oauth-2"),
    )
    .await;
    assert_eq!(wrong_session.outcome.error_kind(), Some(ErrorKind::InvalidResume));
    assert_eq!(wrong_session.final_state.messages, before);
    assert_eq!(wrong_session.final_state.pending_interruptions.len(), 1);

    let wrong_call = resume(paused.final_state, &config, resume_request("c2", "oauth-1")).await;
    assert_eq!(wrong_call.outcome.error_kind(), Some(ErrorKind::InvalidResume));

    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn resume_without_pending_interruption_is_rejected() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("done")]));
    let config = RunConfig::new(agents(), provider.clone());

    let finished = run(RunState::new("assistant", (), "hi"), &config).await;
    assert!(finished.outcome.is_completed());

    let result = resume(finished.final_state, &config, resume_request("c1", "oauth-1")).await;
    assert_eq!(result.outcome.error_kind(), Some(ErrorKind::InvalidResume));
}

#[tokio::test]
async fn resume_uses_the_issuing_agent_after_a_handoff() {
    let agents = AgentRegistry::new()
        .with(
            Agent::new("front")
                .with_tool(ConnectTool::new())
                .with_handoff("back"),
        )
        .with(Agent::new("back").with_instructions("wrap up"));
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_response(&[
            ("h1", HANDOFF_TOOL_NAME, json!({"agent_name": "back"})),
            ("c1", "connect", json!({"service": "drive"})),
        ]),
        text_response("linked"),
    ]));
    let config = RunConfig::new(agents, provider.clone());

    let paused = run(RunState::new("front", (), "link drive"), &config).await;

    let Outcome::Interrupted { interruptions } = &paused.outcome else {
        panic!("expected interruption, got {:?}", paused.outcome);
    };
    assert_eq!(interruptions[0].agent_name, "front");
    assert_eq!(paused.final_state.current_agent_name, "back");

    let result = resume(paused.final_state, &config, resume_request("c1", "oauth-1")).await;

    assert_eq!(result.outcome, Outcome::Completed { output: json!("linked") });
    // "back" has no connect tool, so the call must have run with "front"'s tools
    assert_eq!(result.final_state.messages[3].content, "connected drive with xyz");
    assert_eq!(result.final_state.current_agent_name, "back");
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].agent_name, "back");
    assert_eq!(requests[1].instructions, "wrap up");
}

#[tokio::test]
async fn cancelled_token_stops_resume_before_the_tool_runs() {
    let provider = Arc::new(ScriptedProvider::new(vec![first_turn(), text_response("never")]));
    let config = RunConfig::new(agents(), provider.clone());
    let paused = run(RunState::new("assistant", (), "link my calendar"), &config).await;

    let token = CancellationToken::new();
    token.cancel();
    let cancelled = config.clone().with_cancellation(token);
    let sink = Arc::new(RecordingSink::new());
    let cancelled = cancelled.with_sink(sink.clone());

    let result = resume(paused.final_state, &cancelled, resume_request("c1", "oauth-1")).await;

    assert_eq!(result.outcome, Outcome::Error(RunError::Cancelled));
    assert_eq!(result.final_state.pending_interruptions.len(), 1);
    assert_eq!(result.final_state.messages.len(), 2);
    assert_eq!(sink.count("tool_call_start"), 0);
    assert_eq!(provider.calls(), 1);
}

#[test]
fn resume_request_deserializes_without_conversation() {
    let request: ResumeRequest = serde_json::from_value(json!({
        "session_id": "oauth-1",
        "tool_call_id": "c1",
        "input": {"code": "xyz"}
    }))
    .unwrap();
    assert_eq!(request.conversation_id, None);
    assert_eq!(request.session_id.as_str(), "oauth-1");
}
