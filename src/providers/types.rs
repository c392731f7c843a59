//! Provider type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A canonical provider identity.
///
/// Canonical names come from a small closed set ("openai", "anthropic", ...);
/// each alias maps to exactly one provider. The set itself lives in the
/// database; this struct is the in-memory image of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Stable identifier (uuid).
    pub id: String,
    /// Canonical name, unique across providers.
    pub name: String,
    /// Alternative names that resolve to this provider.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Human-readable display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Inactive providers are kept for history but excluded from lookups.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Provider {
    /// Create a new active provider with a fresh id.
    pub fn new(name: impl Into<String>, aliases: Vec<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: Some(name.clone()),
            name,
            aliases,
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_provider_is_active_with_fresh_id() {
        let p = Provider::new("openai", vec!["oai".to_string()]);
        assert!(p.active);
        assert!(!p.id.is_empty());
        assert_eq!(p.name, "openai");
        assert_eq!(p.aliases, vec!["oai"]);
    }

    #[test]
    fn test_provider_ids_are_unique() {
        let a = Provider::new("openai", vec![]);
        let b = Provider::new("openai", vec![]);
        assert_ne!(a.id, b.id);
    }
}
