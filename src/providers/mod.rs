//! Provider identity and registry.
//!
//! This module provides:
//! - `Provider` - A canonical upstream AI vendor identity
//! - `ProviderRegistry` - Database-backed, cached provider lookup

mod registry;
mod types;

pub use registry::ProviderRegistry;
pub use types::Provider;
