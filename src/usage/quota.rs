//! Quota configuration and check-result types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cache::WindowUsage;

/// Configured token ceilings for one model. An absent limit means unlimited
/// for that dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Stable identifier (uuid).
    pub id: String,
    /// The model this quota applies to.
    pub model_id: String,
    /// Ceiling for a single request's token count.
    pub max_tokens_per_message: Option<u64>,
    /// Ceiling for the current minute window (projected).
    pub max_tokens_per_minute: Option<u64>,
    /// Ceiling for the current day window (projected).
    pub max_tokens_per_day: Option<u64>,
    /// Inactive quotas are ignored by checks.
    pub active: bool,
}

impl Quota {
    /// An all-unlimited quota for a model - the lazily created default.
    pub fn unlimited(model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            max_tokens_per_message: None,
            max_tokens_per_minute: None,
            max_tokens_per_day: None,
            active: true,
        }
    }

    /// Whether no dimension is limited.
    pub fn is_unlimited(&self) -> bool {
        self.max_tokens_per_message.is_none()
            && self.max_tokens_per_minute.is_none()
            && self.max_tokens_per_day.is_none()
    }
}

/// Token counts for one completed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build a usage delta; the total is derived.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Current usage across the three windows. Missing buckets read as zeros.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub minute: WindowUsage,
    pub hour: WindowUsage,
    pub day: WindowUsage,
}

/// Outcome of a quota check.
///
/// A denial carries a human-readable reason plus the usage snapshot and quota
/// it was decided against; an allow may carry neither when the check failed
/// open.
#[derive(Debug, Clone)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub usage: UsageSnapshot,
    pub quota: Option<Quota>,
}

impl QuotaCheck {
    pub fn allow(usage: UsageSnapshot, quota: Option<Quota>) -> Self {
        Self {
            allowed: true,
            reason: None,
            usage,
            quota,
        }
    }

    pub fn deny(reason: impl Into<String>, usage: UsageSnapshot, quota: Quota) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            usage,
            quota: Some(quota),
        }
    }

    /// The degraded allow used when quota state can't be determined.
    /// Enforcement is advisory; errors must never block traffic.
    pub fn fail_open() -> Self {
        Self {
            allowed: true,
            reason: None,
            usage: UsageSnapshot::default(),
            quota: None,
        }
    }
}

/// Read API bundle: quota, current usage, and the check that would apply to a
/// zero-token request right now.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub quota: Option<Quota>,
    pub usage: UsageSnapshot,
    pub check: QuotaCheck,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_quota() {
        let quota = Quota::unlimited("m1");
        assert!(quota.is_unlimited());
        assert!(quota.active);
        assert_eq!(quota.model_id, "m1");
    }

    #[test]
    fn test_limited_quota_is_not_unlimited() {
        let quota = Quota {
            max_tokens_per_day: Some(1000),
            ..Quota::unlimited("m1")
        };
        assert!(!quota.is_unlimited());
    }

    #[test]
    fn test_token_usage_total_is_derived() {
        let usage = TokenUsage::new(30, 12);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn test_deny_carries_reason_and_quota() {
        let quota = Quota::unlimited("m1");
        let check = QuotaCheck::deny("daily limit hit", UsageSnapshot::default(), quota);
        assert!(!check.allowed);
        assert_eq!(check.reason.as_deref(), Some("daily limit hit"));
        assert!(check.quota.is_some());
    }

    #[test]
    fn test_fail_open_allows() {
        let check = QuotaCheck::fail_open();
        assert!(check.allowed);
        assert!(check.reason.is_none());
    }
}
