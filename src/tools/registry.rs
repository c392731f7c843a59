//! Tool registry: cached tool lookup with runtime discovery.
//!
//! Structurally the same caching pattern as the provider and model
//! registries, plus the one mutating operation in the registry family:
//! [`discover`](ToolRegistry::discover) self-registers tool definitions first
//! observed in live traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::params;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::RegistryError;

use super::types::{Tool, ToolDefinition};

/// In-memory image of the tools table.
#[derive(Debug, Default)]
struct ToolMaps {
    by_id: HashMap<String, Arc<Tool>>,
    /// Lowercased tool name -> tool id.
    by_name: HashMap<String, String>,
}

/// Registry of tools loaded from the database.
pub struct ToolRegistry {
    db: Arc<Database>,
    maps: RwLock<ToolMaps>,
    loaded: AtomicBool,
    init_lock: Mutex<()>,
}

impl ToolRegistry {
    /// Create a registry over the given database.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            maps: RwLock::new(ToolMaps::default()),
            loaded: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Look up a tool by id or name.
    pub async fn find(&self, key: &str) -> Result<Option<Arc<Tool>>, RegistryError> {
        self.ensure_loaded().await?;
        let maps = self.maps.read().await;
        if let Some(tool) = maps.by_id.get(key) {
            return Ok(Some(Arc::clone(tool)));
        }
        Ok(maps
            .by_name
            .get(&key.to_lowercase())
            .and_then(|id| maps.by_id.get(id))
            .map(Arc::clone))
    }

    /// Strict variant of [`find`](Self::find).
    pub async fn require(&self, key: &str) -> Result<Arc<Tool>, RegistryError> {
        self.find(key)
            .await?
            .ok_or_else(|| RegistryError::ToolNotFound(key.to_string()))
    }

    /// Whether any tool matches the key.
    pub async fn contains(&self, key: &str) -> Result<bool, RegistryError> {
        Ok(self.find(key).await?.is_some())
    }

    /// All tools, sorted by name.
    pub async fn all(&self) -> Result<Vec<Arc<Tool>>, RegistryError> {
        self.ensure_loaded().await?;
        let maps = self.maps.read().await;
        let mut tools: Vec<Arc<Tool>> = maps.by_id.values().map(Arc::clone).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    /// Number of tools in the registry.
    pub async fn len(&self) -> Result<usize, RegistryError> {
        self.ensure_loaded().await?;
        Ok(self.maps.read().await.by_id.len())
    }

    /// Whether the registry holds no tools.
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

    /// Register a batch of observed tool definitions.
    ///
    /// Definitions already known by name are skipped. New ones get an id, are
    /// persisted, and are inserted into the in-memory maps. Per-item insert
    /// failures are logged and skipped; the batch never aborts wholesale.
    /// Returns the number of tools actually inserted.
    pub async fn discover(
        &self,
        definitions: Vec<ToolDefinition>,
    ) -> Result<usize, RegistryError> {
        self.ensure_loaded().await?;

        let mut inserted = 0;
        let mut maps = self.maps.write().await;

        for definition in definitions {
            let name_key = definition.name.to_lowercase();
            if maps.by_name.contains_key(&name_key) {
                continue;
            }

            let tool = Arc::new(Tool::from_definition(definition));
            if let Err(e) = Self::add_tool_to_db(&self.db, &tool) {
                warn!(tool = %tool.name, error = %e, "Failed to persist discovered tool, skipping");
                continue;
            }

            debug!(tool = %tool.name, id = %tool.id, "Discovered new tool");
            maps.by_name.insert(name_key, tool.id.clone());
            maps.by_id.insert(tool.id.clone(), tool);
            inserted += 1;
        }

        Ok(inserted)
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

    fn load_maps(db: &Database) -> Result<ToolMaps, RegistryError> {
        let mut maps = ToolMaps::default();

        let conn = db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, input_schema, output_schema, provider_options, description
             FROM tools ORDER BY rowid",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Tool {
                id: row.get(0)?,
                name: row.get(1)?,
                input_schema: parse_blob(row.get::<_, Option<String>>(2)?),
                output_schema: parse_blob(row.get::<_, Option<String>>(3)?),
                provider_options: parse_blob(row.get::<_, Option<String>>(4)?),
                description: row.get(5)?,
            })
        })?;

        for tool in rows.flatten() {
            let tool = Arc::new(tool);
            maps.by_name.insert(tool.name.to_lowercase(), tool.id.clone());
            maps.by_id.insert(tool.id.clone(), tool);
        }

        debug!(total_tools = maps.by_id.len(), "ToolRegistry loaded");
        Ok(maps)
    }

    fn add_tool_to_db(db: &Database, tool: &Tool) -> Result<(), RegistryError> {
        db.conn().execute(
            "INSERT INTO tools (id, name, input_schema, output_schema, provider_options,
                description, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, unixepoch())",
            params![
                &tool.id,
                &tool.name,
                tool.input_schema.as_ref().map(Value::to_string),
                tool.output_schema.as_ref().map(Value::to_string),
                tool.provider_options.as_ref().map(Value::to_string),
                &tool.description,
            ],
        )?;
        Ok(())
    }
}

/// Lossy parse of a stored JSON blob; malformed rows degrade to `None`.
fn parse_blob(raw: Option<String>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("loaded", &self.loaded.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_registry() -> ToolRegistry {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        ToolRegistry::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = setup_registry();
        assert!(registry.is_empty().await.unwrap());
        assert_eq!(registry.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_discover_inserts_new_tools() {
        let registry = setup_registry();

        let inserted = registry
            .discover(vec![
                ToolDefinition::named("web_search"),
                ToolDefinition::named("code_interpreter"),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 2);
        assert!(registry.contains("web_search").await.unwrap());
        assert!(registry.contains("code_interpreter").await.unwrap());
    }

    #[tokio::test]
    async fn test_discover_skips_known_names() {
        let registry = setup_registry();

        registry
            .discover(vec![ToolDefinition::named("web_search")])
            .await
            .unwrap();
        let inserted = registry
            .discover(vec![
                ToolDefinition::named("web_search"),
                ToolDefinition::named("fetch_url"),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(registry.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_discover_dedupes_within_one_batch() {
        let registry = setup_registry();

        let inserted = registry
            .discover(vec![
                ToolDefinition::named("web_search"),
                ToolDefinition::named("WEB_SEARCH"),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_discover_persists_schemas() {
        let registry = setup_registry();

        let def = ToolDefinition {
            name: "web_search".to_string(),
            input_schema: Some(json!({"type": "object", "properties": {"q": {"type": "string"}}})),
            output_schema: Some(json!({"type": "array"})),
            provider_options: Some(json!({"retries": 2})),
            description: Some("Search the web".to_string()),
        };
        registry.discover(vec![def.clone()]).await.unwrap();

        // Force a reload from the durable store.
        registry.refresh().await.unwrap();

        let tool = registry.require("web_search").await.unwrap();
        assert_eq!(tool.input_schema, def.input_schema);
        assert_eq!(tool.output_schema, def.output_schema);
        assert_eq!(tool.provider_options, def.provider_options);
        assert_eq!(tool.description, def.description);
    }

    #[tokio::test]
    async fn test_find_by_id_and_name() {
        let registry = setup_registry();
        registry
            .discover(vec![ToolDefinition::named("web_search")])
            .await
            .unwrap();

        let by_name = registry.find("web_search").await.unwrap().unwrap();
        let by_id = registry.find(&by_name.id).await.unwrap().unwrap();
        assert_eq!(by_name.id, by_id.id);
    }

    #[tokio::test]
    async fn test_require_unknown_raises_not_found() {
        let registry = setup_registry();
        let err = registry.require("nonexistent").await.unwrap_err();
        assert!(matches!(err, RegistryError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_all_sorted_by_name() {
        let registry = setup_registry();
        registry
            .discover(vec![
                ToolDefinition::named("zeta"),
                ToolDefinition::named("alpha"),
            ])
            .await
            .unwrap();

        let names: Vec<String> = registry
            .all()
            .await
            .unwrap()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
