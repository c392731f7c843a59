//! Tokengate Core Library
//!
//! This crate provides the identity and metering layer of an AI request
//! gateway. It includes:
//!
//! - Provider registry (canonical provider names and aliases)
//! - Model registry with reference normalization (`provider:model` forms)
//! - Tool registry with batch discovery
//! - Quota enforcement over sliding usage windows (minute / hour / day)
//! - Usage recording into a fast store and a durable SQLite history
//! - Database layer for providers, models, tools, quotas, and usage windows

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod providers;
pub mod tools;
pub mod usage;

// Re-exports for convenience
pub use config::MeteringConfig;
pub use db::Database;
pub use error::RegistryError;

// Re-export providers
pub use providers::{Provider, ProviderRegistry};

// Re-export models
pub use models::{Model, ModelClass, ModelIdentity, ModelRef, ModelRegistry, ResolvedModel};

// Re-export tools
pub use tools::{Tool, ToolDefinition, ToolRegistry};

// Re-export usage accounting
pub use usage::{
    CacheError, MemoryUsageCache, Quota, QuotaCheck, TokenUsage, UsageCache, UsageReport,
    UsageService, UsageSnapshot, WindowKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
