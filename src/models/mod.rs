//! Model identity, normalization, and registry.
//!
//! This module provides:
//! - `Model` - A provider-owned model identity
//! - `ModelRef` - Tagged union over the caller-supplied reference shapes
//! - `ResolvedModel` / `ModelIdentity` - Two-phase resolution result
//! - `ModelClass` - Advisory classification
//! - `ModelRegistry` - Database-backed, cached model lookup and normalization

mod registry;
mod types;

pub use registry::ModelRegistry;
pub use types::{Model, ModelClass, ModelIdentity, ModelRef, ResolvedModel};
