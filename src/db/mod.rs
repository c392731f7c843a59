//! SQLite database layer for tokengate.
//!
//! The durable store is always authoritative. It holds:
//! - Providers, models, and tools (canonical identities)
//! - Quotas (token ceilings per model)
//! - Usage windows (long-term token accounting)

mod migrations;

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

/// A single usage-window row as stored durably.
///
/// Counters are additive only; the row is keyed by
/// (model id, window start, window type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageWindowRow {
    pub model_id: String,
    pub window_start: i64,
    pub window_end: i64,
    pub window_type: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub request_count: i64,
}

/// Database connection wrapper.
///
/// Provides a high-level API for interacting with the SQLite database.
/// Automatically handles connection setup, migrations, and file permissions.
/// The connection is behind a mutex so a shared `Arc<Database>` can be used
/// from many concurrent tasks.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open the database at the default location.
    ///
    /// Default path: `~/.local/share/tokengate/tokengate.db`
    pub fn open() -> anyhow::Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open the database at a specific path.
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 0600 on Unix.
    pub fn open_at(path: PathBuf) -> anyhow::Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(path = %path.display(), error = %e, "Failed to set database file permissions");
            }
        }

        // Enable foreign keys for referential integrity
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Open an in-memory database. Useful for tests and ephemeral deployments.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Get the default database path.
    ///
    /// Returns `~/.local/share/tokengate/tokengate.db` (or platform equivalent).
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("tokengate").join("tokengate.db"))
    }

    /// Run database migrations.
    ///
    /// Safe to call multiple times - migrations are tracked and only run once.
    pub fn migrate(&self) -> anyhow::Result<()> {
        migrations::run_migrations(&self.conn())?;
        Ok(())
    }

    /// Lock and return the underlying connection.
    ///
    /// Use sparingly - prefer the high-level methods when possible. Never hold
    /// the guard across an await point.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the database file path, if file-backed.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    // =========================================================================
    // Usage Windows
    // =========================================================================

    /// Additively upsert a usage-window row (insert or increment on conflict).
    ///
    /// `request_delta` is the number of requests this delta represents,
    /// normally 1.
    pub fn upsert_usage_window(
        &self,
        model_id: &str,
        window_type: &str,
        window_start: i64,
        window_end: i64,
        prompt_tokens: i64,
        completion_tokens: i64,
        total_tokens: i64,
        request_delta: i64,
    ) -> Result<(), rusqlite::Error> {
        self.conn().execute(
            "INSERT INTO usage_windows (model_id, window_start, window_end, window_type,
                prompt_tokens, completion_tokens, total_tokens, request_count, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, unixepoch())
             ON CONFLICT(model_id, window_start, window_type) DO UPDATE SET
                prompt_tokens = prompt_tokens + excluded.prompt_tokens,
                completion_tokens = completion_tokens + excluded.completion_tokens,
                total_tokens = total_tokens + excluded.total_tokens,
                request_count = request_count + excluded.request_count,
                updated_at = excluded.updated_at",
            params![
                model_id,
                window_start,
                window_end,
                window_type,
                prompt_tokens,
                completion_tokens,
                total_tokens,
                request_delta,
            ],
        )?;
        Ok(())
    }

    /// Read a single usage-window row.
    ///
    /// Returns `None` if the bucket has never been written.
    pub fn get_usage_window(
        &self,
        model_id: &str,
        window_type: &str,
        window_start: i64,
    ) -> Result<Option<UsageWindowRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT model_id, window_start, window_end, window_type,
                    prompt_tokens, completion_tokens, total_tokens, request_count
             FROM usage_windows
             WHERE model_id = ? AND window_type = ? AND window_start = ?",
        )?;
        let result = stmt.query_row(params![model_id, window_type, window_start], |row| {
            Ok(UsageWindowRow {
                model_id: row.get(0)?,
                window_start: row.get(1)?,
                window_end: row.get(2)?,
                window_type: row.get(3)?,
                prompt_tokens: row.get(4)?,
                completion_tokens: row.get(5)?,
                total_tokens: row.get(6)?,
                request_count: row.get(7)?,
            })
        });
        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List all usage-window rows for a model, newest bucket first.
    pub fn list_usage_windows(
        &self,
        model_id: &str,
        window_type: &str,
    ) -> Result<Vec<UsageWindowRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT model_id, window_start, window_end, window_type,
                    prompt_tokens, completion_tokens, total_tokens, request_count
             FROM usage_windows
             WHERE model_id = ? AND window_type = ?
             ORDER BY window_start DESC",
        )?;
        let rows = stmt.query_map(params![model_id, window_type], |row| {
            Ok(UsageWindowRow {
                model_id: row.get(0)?,
                window_start: row.get(1)?,
                window_end: row.get(2)?,
                window_type: row.get(3)?,
                prompt_tokens: row.get(4)?,
                completion_tokens: row.get(5)?,
                total_tokens: row.get(6)?,
                request_count: row.get(7)?,
            })
        })?;
        rows.collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
