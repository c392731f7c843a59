//! Usage accounting: sliding-window token metering and quota enforcement.
//!
//! This module provides:
//! - `WindowKind` - The three fixed-aligned window types
//! - `UsageCache` / `MemoryUsageCache` - The fast atomic-counter store
//! - `Quota`, `TokenUsage`, `UsageSnapshot`, `QuotaCheck`, `UsageReport`
//! - `UsageService` - Quota checks and usage recording on the request path

mod cache;
mod quota;
mod service;
mod windows;

pub use cache::{CacheError, MemoryUsageCache, UsageCache, WindowUsage};
pub use quota::{Quota, QuotaCheck, TokenUsage, UsageReport, UsageSnapshot};
pub use service::UsageService;
pub use windows::WindowKind;
