//! Example: a two-agent support desk.
//!
//! A triage agent hands billing questions to a billing agent, which looks up
//! an invoice and answers with a citation. The model is scripted, so no API
//! key is needed.
//!
//! Run with: `RUST_LOG=keel=debug cargo run -p keel --example support_desk`

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keel::engine::HANDOFF_TOOL_NAME;
use keel::prelude::*;
use keel::types::AssistantMessage;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

// --- Scripted model: replays one reply per call ---

struct ScriptedModel {
    replies: Mutex<VecDeque<AssistantMessage>>,
}

impl ScriptedModel {
    fn new(replies: Vec<AssistantMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        println!(
            "  [model] {} sees {} messages, {} tools",
            request.agent_name,
            request.messages.len(),
            request.tools.len()
        );
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".into()))?;
        Ok(CompletionResponse {
            message,
            usage: None,
        })
    }
}

// --- Per-run context shared with tools ---

struct Desk {
    invoices: Vec<(&'static str, f64)>,
}

struct InvoiceLookup {
    schema: ToolSchema,
}

impl InvoiceLookup {
    fn new() -> Self {
        Self {
            schema: ToolSchema {
                name: "lookup_invoice".into(),
                description: "Find an invoice by id.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {"invoice_id": {"type": "string"}},
                    "required": ["invoice_id"]
                }),
            },
        }
    }
}

#[async_trait]
impl Tool<Desk> for InvoiceLookup {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<Desk>) -> Result<ToolResult, ToolError> {
        let id = args["invoice_id"].as_str().unwrap_or_default();
        ctx.context
            .invoices
            .iter()
            .find(|(invoice, _)| *invoice == id)
            .map(|(invoice, amount)| ToolResult::plain(json!({"invoice": invoice, "amount": amount})))
            .ok_or_else(|| ToolError::ExecutionFailed(format!("no invoice {id}")))
    }
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keel=info")))
        .init();

    let agents = AgentRegistry::new()
        .with(
            Agent::new("triage")
                .with_instructions("Route the customer to the right desk.")
                .with_handoff("billing"),
        )
        .with(
            Agent::new("billing")
                .with_dynamic_instructions(|state: &RunState<Desk>| {
                    format!(
                        "You handle billing. {} invoices on file.",
                        state.context.invoices.len()
                    )
                })
                .with_tool(InvoiceLookup::new())
                .with_guardrails(AdvancedGuardrailConfig::default().with_citations(true)),
        );

    let model = Arc::new(ScriptedModel::new(vec![
        AssistantMessage::tool_calls(vec![call(
            "h1",
            HANDOFF_TOOL_NAME,
            json!({"agent_name": "billing", "message": "question about INV-7"}),
        )]),
        AssistantMessage::tool_calls(vec![call(
            "t1",
            "lookup_invoice",
            json!({"invoice_id": "INV-7"}),
        )]),
        AssistantMessage::text("Invoice INV-7 is for $42.50 [1]."),
    ]));

    let no_card_numbers = FnGuardrail::new("no_card_numbers", |text: &str| {
        if text.chars().filter(char::is_ascii_digit).count() >= 16 {
            ValidationResult::invalid("please don't share card numbers")
        } else {
            ValidationResult::Valid
        }
    });

    let config = RunConfig::new(agents, model)
        .with_max_turns(5)
        .with_input_guardrail(no_card_numbers)
        .with_sink(Arc::new(TracingSink));

    let desk = Desk {
        invoices: vec![("INV-7", 42.5), ("INV-8", 10.0)],
    };
    let result = run(RunState::new("triage", desk, "How much is invoice INV-7?"), &config).await;

    println!("status: {}", result.outcome.status());
    println!("agent:  {}", result.final_state.current_agent_name);
    println!("turns:  {}", result.final_state.turn_count);
    match result.outcome {
        Outcome::Completed { output } => println!("answer: {output}"),
        Outcome::Error(err) => println!("error:  {err}"),
        Outcome::Interrupted { interruptions } => {
            println!("waiting on {} external inputs", interruptions.len())
        }
    }
}
