//! Model type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistryError;

/// A provider-owned model identity. Unique per (provider id, model name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Stable identifier (uuid).
    pub id: String,
    /// Owning provider id.
    pub provider_id: String,
    /// Model name as the provider knows it (e.g. "gpt-4").
    pub model_name: String,
    /// Human-readable display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Inactive models are kept for history but excluded from lookups.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Model {
    /// Create a new active model with a fresh id.
    pub fn new(provider_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.into(),
            display_name: Some(model_name.clone()),
            model_name,
            active: true,
        }
    }
}

/// Advisory classification for a model, derived from an ordered substring
/// rule table (see [`MeteringConfig`](crate::config::MeteringConfig)).
/// Metadata only - never part of identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    /// Frontier-grade chat/completion model.
    HighFidelity,
    /// Small or distilled chat/completion model.
    LowFidelity,
    /// Embedding model.
    Embedding,
}

impl std::fmt::Display for ModelClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelClass::HighFidelity => write!(f, "high_fidelity"),
            ModelClass::LowFidelity => write!(f, "low_fidelity"),
            ModelClass::Embedding => write!(f, "embedding"),
        }
    }
}

/// The shapes a caller-supplied model reference can take.
///
/// Callers hand the gateway anything from a bare model name to a full handle;
/// normalization resolves all of them through the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    /// A bare string: either a model name or a provider name alone.
    Name(String),
    /// A "provider:model" compound string, already split.
    Compound { provider: String, model: String },
    /// A handle exposing explicit provider and model fields.
    Handle { provider: String, model: String },
}

impl ModelRef {
    /// Parse a raw string reference.
    ///
    /// A `:` separator yields a compound reference; the model part may itself
    /// contain further colons.
    pub fn parse(input: &str) -> Self {
        match input.split_once(':') {
            Some((provider, model)) if !provider.trim().is_empty() && !model.trim().is_empty() => {
                ModelRef::Compound {
                    provider: provider.trim().to_string(),
                    model: model.trim().to_string(),
                }
            }
            _ => ModelRef::Name(input.trim().to_string()),
        }
    }

    /// Build a handle reference from explicit provider and model fields.
    pub fn handle(provider: impl Into<String>, model: impl Into<String>) -> Self {
        ModelRef::Handle {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// The raw caller-supplied form, for error messages.
    pub fn raw(&self) -> String {
        match self {
            ModelRef::Name(name) => name.clone(),
            ModelRef::Compound { provider, model } | ModelRef::Handle { provider, model } => {
                format!("{provider}:{model}")
            }
        }
    }
}

/// A fully resolved identity, produced by [`ResolvedModel::enforce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub provider_id: String,
    pub model_id: String,
    pub model_name: String,
}

/// Best-effort resolution of a caller-supplied reference.
///
/// Accounting code can use a partial resolution for informational purposes;
/// strict call sites invoke [`enforce`](Self::enforce) to turn missing pieces
/// into typed not-found errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Resolved provider id, if the provider was recognized.
    pub provider_id: Option<String>,
    /// Canonical provider name, if the provider was recognized.
    pub provider_name: Option<String>,
    /// The model name as supplied (possibly unknown to the registry).
    pub model_name: String,
    /// Resolved model id, if the (provider, model) pair was recognized.
    pub model_id: Option<String>,
    /// Advisory classification; set only for recognized models.
    pub class: Option<ModelClass>,
    /// The raw caller-supplied reference, kept for error messages.
    pub raw: String,
}

impl ResolvedModel {
    /// Whether both provider and model resolved.
    pub fn is_resolved(&self) -> bool {
        self.provider_id.is_some() && self.model_id.is_some()
    }

    /// Convert to a full identity, raising typed not-found errors for any
    /// missing piece.
    pub fn enforce(&self) -> Result<ModelIdentity, RegistryError> {
        let provider_id = self
            .provider_id
            .clone()
            .ok_or_else(|| RegistryError::ProviderNotFound(self.raw.clone()))?;
        let model_id = self
            .model_id
            .clone()
            .ok_or_else(|| RegistryError::ModelNotFound(self.raw.clone()))?;
        Ok(ModelIdentity {
            provider_id,
            model_id,
            model_name: self.model_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        assert_eq!(ModelRef::parse("gpt-4"), ModelRef::Name("gpt-4".to_string()));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(
            ModelRef::parse("azure:gpt-4"),
            ModelRef::Compound {
                provider: "azure".to_string(),
                model: "gpt-4".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_compound_model_keeps_extra_colons() {
        assert_eq!(
            ModelRef::parse("openai:ft:gpt-4:custom"),
            ModelRef::Compound {
                provider: "openai".to_string(),
                model: "ft:gpt-4:custom".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(
            ModelRef::parse(" azure : gpt-4 "),
            ModelRef::Compound {
                provider: "azure".to_string(),
                model: "gpt-4".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_degenerate_compound_falls_back_to_name() {
        // A trailing colon is not a usable compound reference.
        assert_eq!(
            ModelRef::parse("gpt-4:"),
            ModelRef::Name("gpt-4:".to_string())
        );
    }

    #[test]
    fn test_enforce_on_partial_resolution() {
        let partial = ResolvedModel {
            provider_id: None,
            provider_name: None,
            model_name: "gpt-4".to_string(),
            model_id: None,
            class: None,
            raw: "foo:gpt-4".to_string(),
        };
        assert!(!partial.is_resolved());
        let err = partial.enforce().unwrap_err();
        assert!(matches!(err, RegistryError::ProviderNotFound(_)));
    }

    #[test]
    fn test_enforce_reports_model_when_only_provider_resolved() {
        let partial = ResolvedModel {
            provider_id: Some("p1".to_string()),
            provider_name: Some("openai".to_string()),
            model_name: "gpt-9".to_string(),
            model_id: None,
            class: None,
            raw: "gpt-9".to_string(),
        };
        let err = partial.enforce().unwrap_err();
        assert!(matches!(err, RegistryError::ModelNotFound(_)));
    }

    #[test]
    fn test_enforce_on_full_resolution() {
        let resolved = ResolvedModel {
            provider_id: Some("p1".to_string()),
            provider_name: Some("openai".to_string()),
            model_name: "gpt-4".to_string(),
            model_id: Some("m1".to_string()),
            class: Some(ModelClass::HighFidelity),
            raw: "gpt-4".to_string(),
        };
        let identity = resolved.enforce().unwrap();
        assert_eq!(identity.provider_id, "p1");
        assert_eq!(identity.model_id, "m1");
        assert_eq!(identity.model_name, "gpt-4");
    }
}
