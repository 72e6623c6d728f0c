//! The turn loop.
//!
//! [`run`] drives a [`RunState`] from its first user message to exactly one
//! terminal [`Outcome`]:
//!
//! ```text
//! INIT -> INPUT_GUARDRAILS -> { CALL_MODEL -> (TOOL_PHASE | FINALIZE) }* -> COMPLETED | ERRORED | INTERRUPTED
//! ```
//!
//! Turns are strictly sequential and tool calls within a turn run one at a
//! time in the order the model issued them. Tool and handoff failures are fed
//! back to the model; guardrail, decode, provider and turn-budget failures end
//! the run. [`resume`] continues an interrupted run at the paused tool call.

use std::sync::Arc;

use keel_guardrail::GuardrailSet;
use keel_tool::{ToolContext, ToolError};
use keel_types::{
    AssistantMessage, CompletionRequest, Emitter, GuardrailStage, Interruption, Message, Outcome,
    Role, RunError, SessionId, ToolCall, ToolCallStatus, TraceEvent, ValidationResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agent::Agent;
use crate::handoff::{self, HANDOFF_TOOL_NAME, HandoffDecision, handoff_tool_schema};
use crate::invoke::{error_content, invoke_tool, merge_resume_input, parse_arguments};
use crate::state::{RunConfig, RunResult, RunState};

/// Callback data that resumes an interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Caller-side conversation the run belongs to. Only logged.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Session named by the interruption.
    pub session_id: SessionId,
    /// The paused tool call.
    pub tool_call_id: String,
    /// Input merged into the paused call's arguments.
    pub input: Value,
}

/// Execute a run to its terminal outcome.
pub async fn run<Ctx: Send + Sync + 'static>(
    state: RunState<Ctx>,
    config: &RunConfig<Ctx>,
) -> RunResult<Ctx> {
    let mut run = Run::start(state, config);
    let result = run.execute().await;
    run.finish(result)
}

/// Continue an interrupted run.
///
/// `state` must be the `final_state` of the interrupted result. Input
/// guardrails are not re-run. A request that does not match a pending
/// interruption ends with [`RunError::InvalidResume`] and leaves the
/// conversation untouched.
pub async fn resume<Ctx: Send + Sync + 'static>(
    state: RunState<Ctx>,
    config: &RunConfig<Ctx>,
    request: ResumeRequest,
) -> RunResult<Ctx> {
    let mut run = Run::start(state, config);
    let result = run.resume(request).await;
    run.finish(result)
}

enum ToolPhase {
    Continue,
    Final(Value),
    Interrupted(Vec<Interruption>),
}

/// A candidate final output: model text, or a tool value that skipped
/// summarization.
enum Candidate {
    Text(String),
    Value(Value),
}

impl Candidate {
    fn text(&self) -> String {
        match self {
            Self::Text(text) | Self::Value(Value::String(text)) => text.clone(),
            Self::Value(other) => other.to_string(),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Text(text) => Value::String(text),
            Self::Value(value) => value,
        }
    }
}

struct Run<'a, Ctx> {
    config: &'a RunConfig<Ctx>,
    emitter: Emitter,
    state: RunState<Ctx>,
}

impl<'a, Ctx: Send + Sync + 'static> Run<'a, Ctx> {
    fn start(state: RunState<Ctx>, config: &'a RunConfig<Ctx>) -> Self {
        let emitter = Emitter::new(
            config.sink().clone(),
            state.run_id.clone(),
            state.trace_id.clone(),
        );
        emitter.emit(TraceEvent::RunStart {
            agent_name: state.current_agent_name.clone(),
        });
        Self {
            config,
            emitter,
            state,
        }
    }

    fn finish(self, result: Result<Outcome, RunError>) -> RunResult<Ctx> {
        let outcome = result.unwrap_or_else(Outcome::Error);
        self.emitter.emit(TraceEvent::RunEnd {
            status: outcome.status().to_string(),
            error_kind: outcome.error_kind(),
        });
        RunResult {
            final_state: self.state,
            outcome,
        }
    }

    async fn execute(&mut self) -> Result<Outcome, RunError> {
        self.check_input().await?;
        self.turn_loop().await
    }

    async fn check_input(&self) -> Result<(), RunError> {
        let Some(content) = self.state.first_user_text() else {
            return Ok(());
        };
        let agent = self.config.agents().get(&self.state.current_agent_name);
        let set = GuardrailSet::for_input(
            self.config.input_guardrails(),
            agent.and_then(|a| a.guardrails()),
            self.config.guardrail_service(),
            self.config.default_fast_model(),
        );
        if set.is_empty() {
            return Ok(());
        }
        match set.run(content, &self.emitter).await {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { error_message } => {
                Err(self.violation(GuardrailStage::Input, error_message))
            }
        }
    }

    async fn turn_loop(&mut self) -> Result<Outcome, RunError> {
        loop {
            if self.config.cancellation().is_cancelled() {
                return Err(RunError::Cancelled);
            }
            if self.state.turn_count >= self.config.max_turns() {
                return Err(RunError::MaxTurnsExceeded(self.config.max_turns()));
            }
            self.state.turn_count += 1;
            let turn = self.state.turn_count;

            self.emitter.emit(TraceEvent::TurnStart {
                turn,
                agent_name: self.state.current_agent_name.clone(),
            });
            let agent = self.config.agents().resolve(&self.state.current_agent_name)?;
            let request = self.build_request(&agent);
            self.emitter.emit(TraceEvent::AgentProcessing {
                turn,
                agent_name: agent.name().to_string(),
                message_count: request.messages.len(),
                tool_count: request.tools.len(),
            });

            let reply = self.call_model(&agent, request).await?;

            if !reply.tool_calls.is_empty() {
                let calls = reply.tool_calls.clone();
                self.state.messages.push(reply.into_message());
                let phase = self.tool_phase(&agent, &calls, None).await?;
                if let Some(outcome) = self.settle(&agent, phase).await? {
                    return Ok(outcome);
                }
                continue;
            }

            return match reply.content {
                Some(text) if !text.is_empty() => {
                    self.state.messages.push(Message::assistant(text.clone()));
                    self.finalize(&agent, Candidate::Text(text)).await
                }
                _ => Err(RunError::ModelBehavior(format!(
                    "agent '{}' returned neither content nor tool calls",
                    agent.name()
                ))),
            };
        }
    }

    async fn resume(&mut self, request: ResumeRequest) -> Result<Outcome, RunError> {
        if self.config.cancellation().is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let position = self
            .state
            .pending_interruptions
            .iter()
            .position(|p| p.tool_call_id == request.tool_call_id && p.session_id == request.session_id)
            .ok_or_else(|| {
                RunError::InvalidResume(format!(
                    "no pending interruption for tool call '{}' in session '{}'",
                    request.tool_call_id, request.session_id
                ))
            })?;
        let (calls, index) = self.paused_calls(&request.tool_call_id)?;
        let interruption = self.state.pending_interruptions.remove(position);
        self.state.pending_interruptions.clear();
        let agent = self.config.agents().resolve(&interruption.agent_name)?;

        tracing::info!(
            run_id = %self.state.run_id,
            tool_call_id = %request.tool_call_id,
            conversation_id = request.conversation_id.as_deref().unwrap_or(""),
            "keel.run.resume"
        );

        let args = parse_arguments(&calls[index]).unwrap_or_else(|_| json!({}));
        let args = merge_resume_input(args, request.input);
        let phase = self.tool_phase(&agent, &calls, Some((index, args))).await?;
        if let Some(outcome) = self.settle(&agent, phase).await? {
            return Ok(outcome);
        }
        self.turn_loop().await
    }

    /// Tool calls of the last assistant message and the index of
    /// `tool_call_id` among them.
    fn paused_calls(&self, tool_call_id: &str) -> Result<(Vec<ToolCall>, usize), RunError> {
        let calls = self
            .state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.has_tool_calls())
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();
        let index = calls
            .iter()
            .position(|c| c.id == tool_call_id)
            .ok_or_else(|| {
                RunError::InvalidResume(format!(
                    "tool call '{tool_call_id}' is not part of the last assistant turn"
                ))
            })?;
        Ok((calls, index))
    }

    /// Close out a tool phase. `Some` means the run is over.
    async fn settle(
        &mut self,
        agent: &Arc<Agent<Ctx>>,
        phase: ToolPhase,
    ) -> Result<Option<Outcome>, RunError> {
        match phase {
            ToolPhase::Interrupted(interruptions) => Ok(Some(Outcome::Interrupted { interruptions })),
            ToolPhase::Continue => {
                self.emitter.emit(TraceEvent::TurnEnd {
                    turn: self.state.turn_count,
                });
                Ok(None)
            }
            ToolPhase::Final(value) => {
                self.emitter.emit(TraceEvent::TurnEnd {
                    turn: self.state.turn_count,
                });
                self.finalize(agent, Candidate::Value(value)).await.map(Some)
            }
        }
    }

    fn build_request(&self, agent: &Agent<Ctx>) -> CompletionRequest {
        let mut tools = agent.tools().schemas();
        if !agent.handoffs().is_empty() {
            tools.push(handoff_tool_schema(agent));
        }
        let model_config = agent.model_config();
        CompletionRequest {
            run_id: Some(self.state.run_id.clone()),
            trace_id: Some(self.state.trace_id.clone()),
            agent_name: agent.name().to_string(),
            model: self
                .config
                .model_override()
                .map(str::to_string)
                .or_else(|| model_config.name.clone()),
            temperature: model_config.temperature,
            max_tokens: model_config.max_tokens,
            instructions: agent.instructions(&self.state),
            messages: self.state.messages.clone(),
            tools,
            response_schema: agent.output_codec().and_then(|c| c.schema().cloned()),
        }
    }

    async fn call_model(
        &self,
        agent: &Agent<Ctx>,
        request: CompletionRequest,
    ) -> Result<AssistantMessage, RunError> {
        self.emitter.emit(TraceEvent::LlmCallStart {
            agent_name: agent.name().to_string(),
            model: request.model.clone(),
            message_count: request.messages.len(),
        });

        let cancellation = self.config.cancellation();
        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(RunError::Cancelled),
            result = self.config.provider().complete(request) => {
                result.map_err(|e| RunError::ModelProvider(e.to_string()))?
            }
        };

        self.emitter.emit(TraceEvent::LlmCallEnd {
            agent_name: agent.name().to_string(),
            tool_call_count: response.message.tool_calls.len(),
        });
        if let Some(usage) = response.usage {
            self.emitter.emit(TraceEvent::TokenUsage { usage });
        }
        Ok(response.message)
    }

    /// Process `calls` in order, starting at the resume point if given.
    async fn tool_phase(
        &mut self,
        agent: &Arc<Agent<Ctx>>,
        calls: &[ToolCall],
        resume: Option<(usize, Value)>,
    ) -> Result<ToolPhase, RunError> {
        let (start, mut resumed_args) = match resume {
            Some((index, args)) => (index, Some(args)),
            None => (0, None),
        };
        let mut final_value = None;

        for call in &calls[start..] {
            if call.name == HANDOFF_TOOL_NAME {
                self.handoff(agent, call);
                continue;
            }

            let args = match resumed_args.take() {
                Some(args) => Ok(args),
                None => parse_arguments(call),
            };
            self.emitter.emit(TraceEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: match &args {
                    Ok(args) => args.clone(),
                    Err(_) => Value::String(call.arguments.clone()),
                },
            });

            let result = match args {
                Ok(args) => {
                    let ctx = self.tool_context(agent, call);
                    invoke_tool(agent.tools(), &call.name, args, &ctx).await
                }
                Err(err) => Err(err),
            };

            let result = match result {
                Ok(result) => result,
                Err(ToolError::Cancelled) => return Err(RunError::Cancelled),
                Err(err) => {
                    self.record_tool_error(call, &err);
                    continue;
                }
            };

            if let Some(requirement) = result.input_requirement() {
                let interruption = Interruption {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    agent_name: agent.name().to_string(),
                    session_id: requirement.session_id.clone(),
                    required_input: requirement.spec.clone(),
                };
                tracing::info!(
                    run_id = %self.state.run_id,
                    tool = %call.name,
                    session_id = %requirement.session_id,
                    "keel.run.interrupted"
                );
                self.state.pending_interruptions = vec![interruption.clone()];
                return Ok(ToolPhase::Interrupted(vec![interruption]));
            }

            let text = result.to_model_text();
            let actions = result.actions().cloned().unwrap_or_default();
            if actions.escalate {
                tracing::warn!(
                    run_id = %self.state.run_id,
                    tool = %call.name,
                    "keel.tool.escalate"
                );
            }
            self.emitter.emit(TraceEvent::ToolCallEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                status: ToolCallStatus::Success,
                result: text.clone(),
                escalate: actions.escalate,
                metadata: result.metadata().cloned().unwrap_or_default(),
            });
            self.state
                .messages
                .push(Message::tool_result(call.id.clone(), text));
            if actions.skip_summarization {
                final_value = Some(result.value().clone());
            }
        }

        Ok(final_value.map_or(ToolPhase::Continue, ToolPhase::Final))
    }

    fn tool_context(&self, agent: &Agent<Ctx>, call: &ToolCall) -> ToolContext<Ctx> {
        ToolContext {
            context: self.state.context.clone(),
            run_id: self.state.run_id.clone(),
            trace_id: self.state.trace_id.clone(),
            agent_name: agent.name().to_string(),
            tool_call_id: call.id.clone(),
            cancellation: self.config.cancellation().clone(),
        }
    }

    fn record_tool_error(&mut self, call: &ToolCall, err: &ToolError) {
        tracing::debug!(
            run_id = %self.state.run_id,
            tool = %call.name,
            error = %err,
            "keel.tool.error"
        );
        let content = error_content(&call.name, err);
        self.emitter.emit(TraceEvent::ToolCallEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolCallStatus::Error,
            result: content.clone(),
            escalate: false,
            metadata: serde_json::Map::new(),
        });
        self.state
            .messages
            .push(Message::tool_result(call.id.clone(), content));
    }

    /// Apply a handoff call. Policy is checked against `agent`, the agent
    /// that issued the turn.
    fn handoff(&mut self, agent: &Agent<Ctx>, call: &ToolCall) {
        let from = agent.name().to_string();
        let content = match handoff::decide(agent, call) {
            Ok(HandoffDecision::Approved { to, message }) => {
                self.emitter.emit(TraceEvent::Handoff {
                    from,
                    to: to.clone(),
                });
                self.state.current_agent_name = to.clone();
                json!({ "handoff_to": to, "message": message }).to_string()
            }
            Ok(HandoffDecision::Denied { to, reason }) => {
                self.emitter.emit(TraceEvent::HandoffDenied {
                    from,
                    to: to.clone(),
                    reason: reason.clone(),
                });
                json!({ "error": "handoff_denied", "message": reason, "agent_name": to })
                    .to_string()
            }
            Err(err) => error_content(HANDOFF_TOOL_NAME, &err),
        };
        self.state
            .messages
            .push(Message::tool_result(call.id.clone(), content));
    }

    async fn finalize(&self, agent: &Agent<Ctx>, candidate: Candidate) -> Result<Outcome, RunError> {
        let text = candidate.text();
        let output = match agent.output_codec() {
            Some(codec) => codec.decode(&text).map_err(|e| {
                self.emitter.emit(TraceEvent::DecodeError {
                    agent_name: agent.name().to_string(),
                    error: e.to_string(),
                });
                RunError::Decode(e.to_string())
            })?,
            None => candidate.into_value(),
        };

        let set = GuardrailSet::for_output(
            self.config.output_guardrails(),
            agent.guardrails(),
            self.config.guardrail_service(),
            self.config.default_fast_model(),
        );
        if !set.is_empty()
            && let ValidationResult::Invalid { error_message } = set.run(&text, &self.emitter).await
        {
            return Err(self.violation(GuardrailStage::Output, error_message));
        }

        Ok(Outcome::Completed { output })
    }

    fn violation(&self, stage: GuardrailStage, message: String) -> RunError {
        self.emitter.emit(TraceEvent::GuardrailViolation {
            stage,
            reason: message.clone(),
        });
        RunError::GuardrailViolation { stage, message }
    }
}
