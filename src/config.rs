//! Configuration for tokengate.
//!
//! One serde-friendly struct covers the tunable surface: which provider bare
//! model names fall back to, the ordered prefix table used to infer a provider
//! from a model name, the ordered classification rule table, and the grace
//! period added to fast-store TTLs.

use serde::{Deserialize, Serialize};

use crate::models::ModelClass;

/// Maps a model-name prefix to the provider that owns such models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRule {
    /// Model-name prefix, matched case-insensitively.
    pub prefix: String,
    /// Canonical provider name (or alias) to route to.
    pub provider: String,
}

/// Maps a substring of a model identifier to an advisory class.
///
/// Rules are evaluated in order; the first match wins. Classification is
/// metadata only and never part of identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRule {
    /// Substring matched case-insensitively against the model name.
    pub pattern: String,
    /// Class assigned on match.
    pub class: ModelClass,
}

/// Metering configuration - everything the subsystem needs beyond the stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Provider used for bare model names no prefix rule matches.
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Ordered prefix table for inferring a provider from a bare model name.
    #[serde(default = "default_prefix_rules")]
    pub provider_prefixes: Vec<PrefixRule>,

    /// Ordered substring table for advisory model classification.
    #[serde(default = "default_class_rules")]
    pub class_rules: Vec<ClassRule>,

    /// Grace period (seconds) added on top of each window duration when
    /// setting fast-store TTLs, so buckets outlive their window slightly.
    #[serde(default = "default_cache_grace_secs")]
    pub cache_grace_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_prefix_rules() -> Vec<PrefixRule> {
    [
        ("gpt-", "openai"),
        ("o1", "openai"),
        ("text-embedding", "openai"),
        ("claude-", "anthropic"),
        ("gemini-", "google"),
    ]
    .into_iter()
    .map(|(prefix, provider)| PrefixRule {
        prefix: prefix.to_string(),
        provider: provider.to_string(),
    })
    .collect()
}

fn default_class_rules() -> Vec<ClassRule> {
    // Order matters: "gpt-4o-mini" must hit "mini" before "gpt-4".
    [
        ("embedding", ModelClass::Embedding),
        ("embed", ModelClass::Embedding),
        ("mini", ModelClass::LowFidelity),
        ("nano", ModelClass::LowFidelity),
        ("haiku", ModelClass::LowFidelity),
        ("flash", ModelClass::LowFidelity),
        ("gpt-4", ModelClass::HighFidelity),
        ("o1", ModelClass::HighFidelity),
        ("opus", ModelClass::HighFidelity),
        ("sonnet", ModelClass::HighFidelity),
        ("pro", ModelClass::HighFidelity),
    ]
    .into_iter()
    .map(|(pattern, class)| ClassRule {
        pattern: pattern.to_string(),
        class,
    })
    .collect()
}

fn default_cache_grace_secs() -> u64 {
    60
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            provider_prefixes: default_prefix_rules(),
            class_rules: default_class_rules(),
            cache_grace_secs: default_cache_grace_secs(),
        }
    }
}

impl MeteringConfig {
    /// A default configuration with a different fallback provider.
    pub fn with_default_provider(provider: impl Into<String>) -> Self {
        Self {
            default_provider: provider.into(),
            ..Self::default()
        }
    }

    /// Infer a provider name for a bare model name.
    ///
    /// Walks the prefix table in order; falls back to `default_provider`.
    pub fn infer_provider<'a>(&'a self, model_name: &str) -> &'a str {
        let lowered = model_name.to_lowercase();
        for rule in &self.provider_prefixes {
            if lowered.starts_with(&rule.prefix.to_lowercase()) {
                return &rule.provider;
            }
        }
        &self.default_provider
    }

    /// Classify a model name via the ordered rule table.
    ///
    /// Advisory only; returns `None` when no rule matches.
    pub fn classify(&self, model_name: &str) -> Option<ModelClass> {
        let lowered = model_name.to_lowercase();
        self.class_rules
            .iter()
            .find(|rule| lowered.contains(&rule.pattern.to_lowercase()))
            .map(|rule| rule.class)
    }
}
