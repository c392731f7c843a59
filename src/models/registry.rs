//! Model registry: cached normalization of model references.
//!
//! Shares the provider registry's caching pattern (coalesced lazy load,
//! wholesale-swap refresh) and adds the normalization logic that turns any
//! [`ModelRef`] shape into a canonical (provider id, model name, model id)
//! triple with a deferred-error accessor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::params;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::MeteringConfig;
use crate::db::Database;
use crate::error::RegistryError;
use crate::providers::ProviderRegistry;

use super::types::{Model, ModelRef, ResolvedModel};

/// In-memory image of the models table.
#[derive(Debug, Default)]
struct ModelMaps {
    by_id: HashMap<String, Arc<Model>>,
    /// (provider id, lowercased model name) -> model id.
    by_key: HashMap<(String, String), String>,
}

/// Registry of models loaded from the database.
pub struct ModelRegistry {
    db: Arc<Database>,
    providers: Arc<ProviderRegistry>,
    config: MeteringConfig,
    maps: RwLock<ModelMaps>,
    loaded: AtomicBool,
    init_lock: Mutex<()>,
}

impl ModelRegistry {
    /// Create a registry over the given database and provider registry.
    pub fn new(
        db: Arc<Database>,
        providers: Arc<ProviderRegistry>,
        config: MeteringConfig,
    ) -> Self {
        Self {
            db,
            providers,
            config,
            maps: RwLock::new(ModelMaps::default()),
            loaded: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// The configuration this registry normalizes with.
    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    // =========================================================================
    // Normalization
    // =========================================================================

    /// Normalize a caller-supplied reference, optionally with a separate
    /// model name.
    ///
    /// With `model` present, `provider_or_ref` is taken as a provider
    /// reference. Without it, the string is parsed: a compound
    /// "provider:model" splits, a known provider name resolves alone, and
    /// anything else is treated as a bare model name whose provider is
    /// inferred from the configured prefix table.
    pub async fn normalize(
        &self,
        provider_or_ref: &str,
        model: Option<&str>,
    ) -> Result<ResolvedModel, RegistryError> {
        match model {
            Some(model) => {
                self.resolve(&ModelRef::handle(provider_or_ref, model)).await
            }
            None => self.resolve(&ModelRef::parse(provider_or_ref)).await,
        }
    }

    /// Resolve a [`ModelRef`] into a best-effort identity.
    ///
    /// Errors only on backing-store failure; unrecognized references come
    /// back as partial resolutions whose
    /// [`enforce`](super::ResolvedModel::enforce) raises the typed error.
    pub async fn resolve(&self, reference: &ModelRef) -> Result<ResolvedModel, RegistryError> {
        match reference {
            ModelRef::Handle { provider, model } | ModelRef::Compound { provider, model } => {
                self.resolve_pair(provider, model, reference.raw()).await
            }
            ModelRef::Name(name) => {
                // A known provider name alone resolves to just the provider.
                if let Some(provider) = self.providers.find(name).await? {
                    return Ok(ResolvedModel {
                        provider_id: Some(provider.id.clone()),
                        provider_name: Some(provider.name.clone()),
                        model_name: String::new(),
                        model_id: None,
                        class: None,
                        raw: name.clone(),
                    });
                }
                let inferred = self.config.infer_provider(name).to_string();
                self.resolve_pair(&inferred, name, name.clone()).await
            }
        }
    }

    async fn resolve_pair(
        &self,
        provider_key: &str,
        model_name: &str,
        raw: String,
    ) -> Result<ResolvedModel, RegistryError> {
        let provider = self.providers.find(provider_key).await?;
        self.ensure_loaded().await?;

        let maps = self.maps.read().await;
        let model_id = provider.as_ref().and_then(|p| {
            maps.by_key
                .get(&(p.id.clone(), model_name.to_lowercase()))
                .cloned()
        });

        // Classification is advisory and only meaningful for known models.
        let class = model_id
            .as_ref()
            .and_then(|_| self.config.classify(model_name));

        Ok(ResolvedModel {
            provider_id: provider.as_ref().map(|p| p.id.clone()),
            provider_name: provider.as_ref().map(|p| p.name.clone()),
            model_name: model_name.to_string(),
            model_id,
            class,
            raw,
        })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a model by id.
    pub async fn get(&self, id: &str) -> Result<Option<Arc<Model>>, RegistryError> {
        self.ensure_loaded().await?;
        Ok(self.maps.read().await.by_id.get(id).map(Arc::clone))
    }

    /// Strict variant of [`get`](Self::get).
    pub async fn require(&self, id: &str) -> Result<Arc<Model>, RegistryError> {
        self.get(id)
            .await?
            .ok_or_else(|| RegistryError::ModelNotFound(id.to_string()))
    }

    /// All models, sorted by (provider id, model name).
    pub async fn all(&self) -> Result<Vec<Arc<Model>>, RegistryError> {
        self.ensure_loaded().await?;
        let maps = self.maps.read().await;
        let mut models: Vec<Arc<Model>> = maps.by_id.values().map(Arc::clone).collect();
        models.sort_by(|a, b| {
            (a.provider_id.as_str(), a.model_name.as_str())
                .cmp(&(b.provider_id.as_str(), b.model_name.as_str()))
        });
        Ok(models)
    }

    /// Number of models in the registry.
    pub async fn len(&self) -> Result<usize, RegistryError> {
        self.ensure_loaded().await?;
        Ok(self.maps.read().await.by_id.len())
    }

    /// Whether the registry holds no models.
    pub async fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len().await? == 0)
    }

    /// Reload from the database, atomically replacing the in-memory maps.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        let _guard = self.init_lock.lock().await;
        let fresh = Self::load_maps(&self.db)?;
        *self.maps.write().await = fresh;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Register a model under a provider, persisting it and inserting it into
    /// the in-memory maps. Registering an already-known (provider, model)
    /// pair returns the existing model instead of minting a new id.
    pub async fn register(
        &self,
        provider_key: &str,
        model_name: &str,
    ) -> Result<Arc<Model>, RegistryError> {
        let provider = self.providers.require(provider_key).await?;
        self.ensure_loaded().await?;

        {
            let maps = self.maps.read().await;
            let key = (provider.id.clone(), model_name.to_lowercase());
            if let Some(existing) = maps.by_key.get(&key).and_then(|id| maps.by_id.get(id)) {
                debug!(model = %model_name, provider = %provider.name, "Model already registered");
                return Ok(Arc::clone(existing));
            }
        }

        let mut model = Model::new(provider.id.clone(), model_name);
        // The upsert keeps the original row id on conflict; adopt whatever id
        // the database settled on so the maps never point at a missing row.
        let persisted_id = Self::add_model_to_db(&self.db, &model)?;
        model.id = persisted_id;
        let model = Arc::new(model);

        let mut maps = self.maps.write().await;
        maps.by_key.insert(
            (model.provider_id.clone(), model.model_name.to_lowercase()),
            model.id.clone(),
        );
        maps.by_id.insert(model.id.clone(), Arc::clone(&model));

        debug!(model = %model.model_name, provider = %provider.name, "Registered model");
        Ok(model)
    }

    async fn ensure_loaded(&self) -> Result<(), RegistryError> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let fresh = Self::load_maps(&self.db)?;
        *self.maps.write().await = fresh;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn load_maps(db: &Database) -> Result<ModelMaps, RegistryError> {
        let mut maps = ModelMaps::default();

        let conn = db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, provider_id, model_name, display_name, active
             FROM models WHERE active = 1 ORDER BY rowid",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Model {
                id: row.get(0)?,
                provider_id: row.get(1)?,
                model_name: row.get(2)?,
                display_name: row.get(3)?,
                active: row.get::<_, i64>(4)? != 0,
            })
        })?;

        for model in rows.flatten() {
            let model = Arc::new(model);
            maps.by_key.insert(
                (model.provider_id.clone(), model.model_name.to_lowercase()),
                model.id.clone(),
            );
            debug!(model = %model.model_name, id = %model.id, "Loaded model");
            maps.by_id.insert(model.id.clone(), model);
        }

        debug!(total_models = maps.by_id.len(), "ModelRegistry loaded");
        Ok(maps)
    }

    /// Save a model to the database (upsert by (provider id, model name)).
    ///
    /// Returns the persisted row id, which on conflict is the pre-existing
    /// one rather than `model.id`.
    pub fn add_model_to_db(db: &Database, model: &Model) -> Result<String, RegistryError> {
        let conn = db.conn();
        conn.execute(
            "INSERT INTO models (id, provider_id, model_name, display_name, active, updated_at)
             VALUES (?, ?, ?, ?, ?, unixepoch())
             ON CONFLICT(provider_id, model_name) DO UPDATE SET
                display_name = excluded.display_name,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                &model.id,
                &model.provider_id,
                &model.model_name,
                &model.display_name,
                model.active as i64,
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM models WHERE provider_id = ? AND model_name = ?",
            params![&model.provider_id, &model.model_name],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("loaded", &self.loaded.load(Ordering::Relaxed))
            .finish()
    }
}
