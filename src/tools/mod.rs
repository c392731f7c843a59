//! Tool identity and registry.
//!
//! This module provides:
//! - `ToolDefinition` - A tool as observed in live traffic or seed data
//! - `Tool` - A registered tool with a stable id
//! - `ToolRegistry` - Database-backed, cached tool lookup with runtime
//!   self-registration of newly observed definitions

mod registry;
mod types;

pub use registry::ToolRegistry;
pub use types::{Tool, ToolDefinition};
