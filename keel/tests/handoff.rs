//! Agent-to-agent handoffs.

use std::sync::Arc;

use keel::engine::HANDOFF_TOOL_NAME;
use keel::engine::test_utils::{RecordingSink, ScriptedProvider, text_response, tool_call_response};
use keel::prelude::*;
use serde_json::{Value, json};

fn agents() -> AgentRegistry<()> {
    AgentRegistry::new()
        .with(
            Agent::new("triage")
                .with_instructions("route")
                .with_handoff("billing")
                .with_handoff("ghost"),
        )
        .with(Agent::new("billing").with_instructions("bill"))
        .with(Agent::new("legal").with_instructions("law"))
}

#[tokio::test]
async fn approved_handoff_moves_the_next_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_response(&[(
            "h1",
            HANDOFF_TOOL_NAME,
            json!({"agent_name": "billing", "message": "double charge"}),
        )]),
        text_response("refund issued"),
    ]));
    let sink = Arc::new(RecordingSink::new());
    let config = RunConfig::new(agents(), provider.clone()).with_sink(sink.clone());

    let result = run(RunState::new("triage", (), "charged twice"), &config).await;

    assert_eq!(result.outcome, Outcome::Completed { output: json!("refund issued") });
    assert_eq!(result.final_state.current_agent_name, "billing");
    assert!(sink.events().contains(&TraceEvent::Handoff {
        from: "triage".into(),
        to: "billing".into()
    }));

    let requests = provider.requests();
    assert_eq!(requests[0].agent_name, "triage");
    assert_eq!(requests[1].agent_name, "billing");
    assert_eq!(requests[1].instructions, "bill");
    // billing has no handoff targets, so no handoff tool is offered
    assert!(requests[1].tools.is_empty());

    let confirmation: Value = serde_json::from_str(&result.final_state.messages[2].content).unwrap();
    assert_eq!(confirmation["handoff_to"], "billing");
}

#[tokio::test]
async fn denied_handoff_is_not_fatal() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_response(&[("h1", HANDOFF_TOOL_NAME, json!({"agent_name": "legal"}))]),
        text_response("I'll handle it myself"),
    ]));
    let sink = Arc::new(RecordingSink::new());
    let config = RunConfig::new(agents(), provider.clone()).with_sink(sink.clone());

    let result = run(RunState::new("triage", (), "sue them"), &config).await;

    assert!(result.outcome.is_completed());
    assert_eq!(result.final_state.current_agent_name, "triage");
    assert_eq!(sink.count("handoff_denied"), 1);
    assert_eq!(sink.count("handoff"), 0);
    assert_eq!(provider.requests()[1].agent_name, "triage");

    let denial: Value = serde_json::from_str(&result.final_state.messages[2].content).unwrap();
    assert_eq!(denial["error"], "handoff_denied");
    assert_eq!(result.final_state.messages[2].tool_call_id.as_deref(), Some("h1"));
}

#[tokio::test]
async fn allowed_but_unregistered_target_fails_next_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![tool_call_response(&[(
        "h1",
        HANDOFF_TOOL_NAME,
        json!({"agent_name": "ghost"}),
    )])]));
    let config = RunConfig::new(agents(), provider.clone());

    let result = run(RunState::new("triage", (), "boo"), &config).await;

    assert_eq!(
        result.outcome,
        Outcome::Error(RunError::AgentNotFound("ghost".into()))
    );
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn handoff_offered_only_with_targets() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("hi")]));
    let config = RunConfig::new(agents(), provider.clone());
    run(RunState::new("triage", (), "hello"), &config).await;

    let tools = &provider.requests()[0].tools;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, HANDOFF_TOOL_NAME);
}
