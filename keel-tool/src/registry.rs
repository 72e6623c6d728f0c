//! Ordered tool registry.

use std::sync::Arc;

use keel_types::ToolSchema;

use crate::tool::Tool;

/// Registry of type-erased tools, kept in registration order so the schemas
/// sent to the model are stable across turns.
///
/// Registering a second tool under an existing name replaces the first in
/// place.
pub struct ToolRegistry<Ctx> {
    tools: Vec<Arc<dyn Tool<Ctx>>>,
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool.
    pub fn register<T: Tool<Ctx> + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a pre-erased tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool<Ctx>>) {
        let name = tool.schema().name.clone();
        match self.tools.iter().position(|t| t.schema().name == name) {
            Some(i) => self.tools[i] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool<Ctx>>> {
        self.tools.iter().find(|t| t.schema().name == name)
    }

    /// Schemas of all registered tools, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema().clone()).collect()
    }

    /// Iterate over all registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool<Ctx>>> {
        self.tools.iter()
    }
}

impl<Ctx> ToolRegistry<Ctx> {
    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}
