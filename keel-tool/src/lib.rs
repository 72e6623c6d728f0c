#![deny(missing_docs)]
//! Tool protocol for keel.
//!
//! Tools are stored type-erased (`Arc<dyn Tool<Ctx>>`) in an ordered
//! [`ToolRegistry`]. Arguments are validated against the declared parameter
//! shape with [`validate_arguments`] before a tool ever runs.

pub mod registry;
pub mod tool;
pub mod validate;

pub use keel_types::ToolSchema;
pub use registry::ToolRegistry;
pub use tool::{
    FnTool, InputRequirement, Tool, ToolActions, ToolContext, ToolError, ToolResult,
};
pub use validate::{SchemaViolation, validate_arguments};
