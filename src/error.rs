//! Error taxonomy shared by the registries.
//!
//! Not-found variants are raised only by strict lookups and
//! [`ResolvedModel::enforce`](crate::models::ResolvedModel::enforce); soft
//! lookups return `Option`. Store failures on the request path are swallowed
//! at the accounting boundary and never reach callers.

use thiserror::Error;

/// Errors raised by the provider, model, and tool registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        RegistryError::Database(e.to_string())
    }
}

impl RegistryError {
    /// Whether this error is one of the not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::ProviderNotFound(_)
                | RegistryError::ModelNotFound(_)
                | RegistryError::ToolNotFound(_)
        )
    }
}
