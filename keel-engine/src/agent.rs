//! Agents and the agent registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use keel_guardrail::AdvancedGuardrailConfig;
use keel_tool::{Tool, ToolRegistry};
use keel_types::RunError;
use serde::{Deserialize, Serialize};

use crate::codec::OutputCodec;
use crate::state::RunState;

/// Builds an agent's system instructions from the current run state.
pub type InstructionsFn<Ctx> = dyn Fn(&RunState<Ctx>) -> String + Send + Sync;

/// Model parameters for an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model name. A run-level override takes precedence.
    pub name: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum output tokens.
    pub max_tokens: Option<u32>,
}

/// A named behavior unit: instructions, tools, handoff targets, guardrails
/// and an optional output codec.
///
/// Immutable once built; registries hand out `Arc<Agent>` so concurrent runs
/// share one instance.
///
/// ```ignore
/// let triage = Agent::new("triage")
///     .with_instructions("Route the user to the right specialist.")
///     .with_handoff("billing")
///     .with_tool(lookup_account);
/// ```
pub struct Agent<Ctx> {
    name: String,
    instructions: Arc<InstructionsFn<Ctx>>,
    model_config: ModelConfig,
    tools: ToolRegistry<Ctx>,
    handoffs: HashSet<String>,
    guardrails: Option<AdvancedGuardrailConfig>,
    output_codec: Option<Arc<dyn OutputCodec>>,
}

impl<Ctx: Send + Sync + 'static> Agent<Ctx> {
    /// Create an agent with empty instructions and no tools.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Arc::new(|_: &RunState<Ctx>| String::new()),
            model_config: ModelConfig::default(),
            tools: ToolRegistry::new(),
            handoffs: HashSet::new(),
            guardrails: None,
            output_codec: None,
        }
    }

    /// Fixed instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        let text = instructions.into();
        self.instructions = Arc::new(move |_: &RunState<Ctx>| text.clone());
        self
    }

    /// Instructions computed from the run state on every turn.
    #[must_use]
    pub fn with_dynamic_instructions<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunState<Ctx>) -> String + Send + Sync + 'static,
    {
        self.instructions = Arc::new(f);
        self
    }

    /// Model parameters.
    #[must_use]
    pub fn with_model_config(mut self, config: ModelConfig) -> Self {
        self.model_config = config;
        self
    }

    /// Shorthand for setting only the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_config.name = Some(model.into());
        self
    }

    /// Add a tool.
    #[must_use]
    pub fn with_tool<T: Tool<Ctx> + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    /// Add a pre-erased tool.
    #[must_use]
    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool<Ctx>>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    /// Allow handing off to `target`.
    #[must_use]
    pub fn with_handoff(mut self, target: impl Into<String>) -> Self {
        self.handoffs.insert(target.into());
        self
    }

    /// Guardrail settings.
    #[must_use]
    pub fn with_guardrails(mut self, config: AdvancedGuardrailConfig) -> Self {
        self.guardrails = Some(config);
        self
    }

    /// Decode and validate final output.
    #[must_use]
    pub fn with_output_codec<C: OutputCodec + 'static>(mut self, codec: C) -> Self {
        self.output_codec = Some(Arc::new(codec));
        self
    }
}

impl<Ctx> Agent<Ctx> {
    /// Unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render instructions for `state`.
    pub fn instructions(&self, state: &RunState<Ctx>) -> String {
        (self.instructions)(state)
    }

    /// Model parameters.
    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    /// Tools.
    pub fn tools(&self) -> &ToolRegistry<Ctx> {
        &self.tools
    }

    /// Allowed handoff targets.
    pub fn handoffs(&self) -> &HashSet<String> {
        &self.handoffs
    }

    /// Guardrail settings.
    pub fn guardrails(&self) -> Option<&AdvancedGuardrailConfig> {
        self.guardrails.as_ref()
    }

    /// Output codec.
    pub fn output_codec(&self) -> Option<&Arc<dyn OutputCodec>> {
        self.output_codec.as_ref()
    }
}

impl<Ctx> std::fmt::Debug for Agent<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut handoffs: Vec<_> = self.handoffs.iter().collect();
        handoffs.sort();
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model_config", &self.model_config)
            .field("tools", &self.tools.len())
            .field("handoffs", &handoffs)
            .field("guardrails", &self.guardrails)
            .field("output_codec", &self.output_codec.is_some())
            .finish()
    }
}

/// Read-only mapping from agent name to agent.
pub struct AgentRegistry<Ctx> {
    agents: HashMap<String, Arc<Agent<Ctx>>>,
}

impl<Ctx> AgentRegistry<Ctx> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent, returning the one it replaced.
    pub fn register(&mut self, agent: Agent<Ctx>) -> Option<Arc<Agent<Ctx>>> {
        self.agents.insert(agent.name.clone(), Arc::new(agent))
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, agent: Agent<Ctx>) -> Self {
        self.register(agent);
        self
    }

    /// Look up an agent.
    pub fn get(&self, name: &str) -> Option<&Arc<Agent<Ctx>>> {
        self.agents.get(name)
    }

    /// Look up an agent, failing with [`RunError::AgentNotFound`].
    pub fn resolve(&self, name: &str) -> Result<Arc<Agent<Ctx>>, RunError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| RunError::AgentNotFound(name.to_string()))
    }

    /// Registered names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl<Ctx> Default for AgentRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> std::fmt::Debug for AgentRegistry<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}
