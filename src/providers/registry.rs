//! Provider registry: cached canonicalization of provider identifiers.
//!
//! The registry loads provider rows into memory on first access and serves
//! lookups by id, canonical name, or alias interchangeably. Initialization is
//! coalesced: concurrent callers during a cold start await one in-flight load,
//! and a failed load is retried on the next access. Refresh replaces the whole
//! map in one swap so no reader observes a half-populated registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::params;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::RegistryError;

use super::types::Provider;

/// In-memory image of the providers table.
#[derive(Debug, Default)]
struct ProviderMaps {
    by_id: HashMap<String, Arc<Provider>>,
    /// Lowercased canonical name or alias -> provider id.
    by_key: HashMap<String, String>,
}

impl ProviderMaps {
    fn lookup(&self, key: &str) -> Option<Arc<Provider>> {
        if let Some(provider) = self.by_id.get(key) {
            return Some(Arc::clone(provider));
        }
        let id = self.by_key.get(&key.to_lowercase())?;
        self.by_id.get(id).map(Arc::clone)
    }
}

/// Registry of providers loaded from the database.
pub struct ProviderRegistry {
    db: Arc<Database>,
    maps: RwLock<ProviderMaps>,
    loaded: AtomicBool,
    init_lock: Mutex<()>,
}

impl ProviderRegistry {
    /// Create a registry over the given database. No I/O happens until the
    /// first lookup or an explicit [`refresh`](Self::refresh).
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            maps: RwLock::new(ProviderMaps::default()),
            loaded: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Look up a provider by id, canonical name, or alias.
    ///
    /// Returns `None` when nothing matches; errors only when the backing
    /// store can't be loaded.
    pub async fn find(&self, key: &str) -> Result<Option<Arc<Provider>>, RegistryError> {
        self.ensure_loaded().await?;
        Ok(self.maps.read().await.lookup(key))
    }

    /// Strict variant of [`find`](Self::find): raises a typed not-found error.
    pub async fn require(&self, key: &str) -> Result<Arc<Provider>, RegistryError> {
        self.find(key)
            .await?
            .ok_or_else(|| RegistryError::ProviderNotFound(key.to_string()))
    }

    /// Whether any provider matches the key.
    pub async fn contains(&self, key: &str) -> Result<bool, RegistryError> {
        Ok(self.find(key).await?.is_some())
    }

    /// All providers, sorted by canonical name.
    pub async fn all(&self) -> Result<Vec<Arc<Provider>>, RegistryError> {
        self.ensure_loaded().await?;
        let maps = self.maps.read().await;
        let mut providers: Vec<Arc<Provider>> = maps.by_id.values().map(Arc::clone).collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(providers)
    }

    /// Number of providers in the registry.
    pub async fn len(&self) -> Result<usize, RegistryError> {
        self.ensure_loaded().await?;
        Ok(self.maps.read().await.by_id.len())
    }

    /// Whether the registry holds no providers.
    pub async fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len().await? == 0)
    }

    /// Reload from the database, atomically replacing the in-memory maps.
    ///
    /// Readers that race the swap see either the old or the new map, never a
    /// partially populated one.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        let _guard = self.init_lock.lock().await;
        let fresh = Self::load_maps(&self.db)?;
        *self.maps.write().await = fresh;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Coalesced lazy initialization: the first caller loads, contemporaries
    /// wait on the init lock, and a failed load leaves the flag unset so the
    /// next caller retries.
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

    fn load_maps(db: &Database) -> Result<ProviderMaps, RegistryError> {
        let mut maps = ProviderMaps::default();

        let conn = db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, aliases, display_name, active
             FROM providers WHERE active = 1 ORDER BY rowid",
        )?;

        let rows = stmt.query_map([], |row| {
            let aliases_json: String = row.get(2)?;
            Ok(Provider {
                id: row.get(0)?,
                name: row.get(1)?,
                aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
                display_name: row.get(3)?,
                active: row.get::<_, i64>(4)? != 0,
            })
        })?;

        for provider in rows.flatten() {
            let provider = Arc::new(provider);
            let mut keys = vec![provider.name.to_lowercase()];
            keys.extend(provider.aliases.iter().map(|a| a.to_lowercase()));

            for key in keys {
                if let Some(previous) = maps.by_key.insert(key.clone(), provider.id.clone()) {
                    if previous != provider.id {
                        // Last registration wins; operators get the signal.
                        warn!(
                            alias = %key,
                            previous_provider = %previous,
                            provider = %provider.id,
                            "Alias registered to multiple providers, keeping the last"
                        );
                    }
                }
            }

            debug!(provider = %provider.name, id = %provider.id, "Loaded provider");
            maps.by_id.insert(provider.id.clone(), provider);
        }

        debug!(total_providers = maps.by_id.len(), "ProviderRegistry loaded");
        Ok(maps)
    }

    // =========================================================================
    // Durable-store writes
    // =========================================================================

    /// Save a provider to the database (upsert by canonical name).
    ///
    /// On a name conflict the existing id is kept and the alias/display/active
    /// fields are updated.
    pub fn add_provider_to_db(db: &Database, provider: &Provider) -> Result<(), RegistryError> {
        let aliases = serde_json::to_string(&provider.aliases)
            .map_err(|e| RegistryError::Database(e.to_string()))?;

        db.conn().execute(
            "INSERT INTO providers (id, name, aliases, display_name, active, updated_at)
             VALUES (?, ?, ?, ?, ?, unixepoch())
             ON CONFLICT(name) DO UPDATE SET
                aliases = excluded.aliases,
                display_name = excluded.display_name,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                &provider.id,
                &provider.name,
                &aliases,
                &provider.display_name,
                provider.active as i64,
            ],
        )?;
        Ok(())
    }

    /// Seed the closed set of default providers, skipping names that already
    /// exist. Returns the number of rows inserted. Idempotent.
    pub fn seed_defaults(db: &Database) -> Result<usize, RegistryError> {
        let defaults: &[(&str, &[&str])] = &[
            ("openai", &["oai", "open-ai"]),
            ("anthropic", &["claude"]),
            ("google", &["gemini", "google-ai"]),
            ("azure", &["azure-openai", "aoai"]),
        ];

        let mut inserted = 0;
        for (name, aliases) in defaults {
            let exists: bool = db.conn().query_row(
                "SELECT EXISTS(SELECT 1 FROM providers WHERE name = ?)",
                [name],
                |row| row.get(0),
            )?;
            if exists {
                continue;
            }

            let provider = Provider::new(
                *name,
                aliases.iter().map(|a| a.to_string()).collect(),
            );
            Self::add_provider_to_db(db, &provider)?;
            inserted += 1;
        }

        if inserted > 0 {
            debug!(inserted, "Seeded default providers");
        }
        Ok(inserted)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("loaded", &self.loaded.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_find_by_name_alias_and_id() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = ProviderRegistry::new(Arc::clone(&db));

        let by_name = registry.find("openai").await.unwrap().unwrap();
        let by_alias = registry.find("oai").await.unwrap().unwrap();
        let by_id = registry.find(&by_name.id).await.unwrap().unwrap();

        assert_eq!(by_name.id, by_alias.id);
        assert_eq!(by_name.id, by_id.id);
    }

    #[tokio::test]
    async fn test_find_is_case_insensitive_on_names() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = ProviderRegistry::new(Arc::clone(&db));

        assert!(registry.find("OpenAI").await.unwrap().is_some());
        assert!(registry.find("CLAUDE").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_unknown_returns_none() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = ProviderRegistry::new(Arc::clone(&db));

        assert!(registry.find("foo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_require_unknown_raises_not_found() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = ProviderRegistry::new(Arc::clone(&db));

        let err = registry.require("foo").await.unwrap_err();
        assert!(matches!(err, RegistryError::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn test_all_sorted_by_name() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = ProviderRegistry::new(Arc::clone(&db));

        let names: Vec<String> = registry
            .all()
            .await
            .unwrap()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["anthropic", "azure", "google", "openai"]);
    }

    #[tokio::test]
    async fn test_seed_defaults_is_idempotent() {
        let db = setup_test_db();
        let first = ProviderRegistry::seed_defaults(&db).unwrap();
        let second = ProviderRegistry::seed_defaults(&db).unwrap();
        assert_eq!(first, 4);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_over_unchanged_data() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = ProviderRegistry::new(Arc::clone(&db));

        registry.refresh().await.unwrap();
        let before: Vec<String> = registry
            .all()
            .await
            .unwrap()
            .iter()
            .map(|p| format!("{}:{}", p.id, p.name))
            .collect();

        registry.refresh().await.unwrap();
        let after: Vec<String> = registry
            .all()
            .await
            .unwrap()
            .iter()
            .map(|p| format!("{}:{}", p.id, p.name))
            .collect();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_rows() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = ProviderRegistry::new(Arc::clone(&db));

        assert!(registry.find("xai").await.unwrap().is_none());

        ProviderRegistry::add_provider_to_db(&db, &Provider::new("xai", vec!["grok".to_string()]))
            .unwrap();
        registry.refresh().await.unwrap();

        assert!(registry.find("xai").await.unwrap().is_some());
        assert!(registry.find("grok").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_alias_collision_last_registration_wins() {
        let db = setup_test_db();
        ProviderRegistry::add_provider_to_db(
            &db,
            &Provider::new("openai", vec!["shared".to_string()]),
        )
        .unwrap();
        ProviderRegistry::add_provider_to_db(
            &db,
            &Provider::new("azure", vec!["shared".to_string()]),
        )
        .unwrap();

        let registry = ProviderRegistry::new(Arc::clone(&db));
        // Must not crash; the later registration owns the alias.
        let provider = registry.find("shared").await.unwrap().unwrap();
        assert_eq!(provider.name, "azure");
    }

    #[tokio::test]
    async fn test_inactive_providers_are_excluded() {
        let db = setup_test_db();
        let mut provider = Provider::new("openai", vec![]);
        provider.active = false;
        ProviderRegistry::add_provider_to_db(&db, &provider).unwrap();

        let registry = ProviderRegistry::new(Arc::clone(&db));
        assert!(registry.find("openai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cold_start_is_coalesced() {
        let db = setup_test_db();
        ProviderRegistry::seed_defaults(&db).unwrap();
        let registry = Arc::new(ProviderRegistry::new(Arc::clone(&db)));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.require("openai").await.unwrap().id.clone()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}
