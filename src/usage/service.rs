//! Usage accounting service: quota checks and usage recording.
//!
//! Sits on the request path of every AI call, so its failure semantics are
//! strict in one direction only: no store or resolution failure may ever
//! block a caller's request. Quota enforcement is advisory; anything that
//! goes wrong inside `check_quota` or `record_usage` degrades to fail-open
//! behavior with a structured log entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::params;
use tracing::{debug, warn};

use crate::config::MeteringConfig;
use crate::db::Database;
use crate::error::RegistryError;
use crate::models::{ModelRegistry, ResolvedModel};

use super::cache::{CacheError, UsageCache};
use super::quota::{Quota, QuotaCheck, TokenUsage, UsageReport, UsageSnapshot};
use super::windows::WindowKind;

/// The usage accounting service.
///
/// Normalizes identities through the model registry, checks quotas against
/// fast-store window counters, and records usage into both stores. The fast
/// store is authoritative for real-time enforcement; the durable store keeps
/// the long-term history.
pub struct UsageService {
    models: Arc<ModelRegistry>,
    db: Arc<Database>,
    cache: Arc<dyn UsageCache>,
    grace: Duration,
}

impl UsageService {
    pub fn new(
        models: Arc<ModelRegistry>,
        db: Arc<Database>,
        cache: Arc<dyn UsageCache>,
        config: &MeteringConfig,
    ) -> Self {
        Self {
            models,
            db,
            cache,
            grace: Duration::from_secs(config.cache_grace_secs),
        }
    }

    /// One fast-store key per (provider id, model name, window type).
    fn cache_key(provider_id: &str, model_name: &str, kind: WindowKind) -> String {
        format!("usage:{provider_id}:{}:{kind}", model_name.to_lowercase())
    }

    // =========================================================================
    // Quota configuration
    // =========================================================================

    /// Fetch the quota for a model, lazily creating a permissive
    /// (all-unlimited) row when none exists.
    ///
    /// Strict on identity: unknown provider or model raises the typed
    /// not-found error.
    pub async fn quota(&self, provider: &str, model: &str) -> Result<Quota, RegistryError> {
        let resolved = self.models.normalize(provider, Some(model)).await?;
        let identity = resolved.enforce()?;
        self.quota_for(&identity.model_id).await
    }

    /// Blocking quota read/create moved off the async runtime, same as the
    /// durable writes in `record_usage`.
    async fn quota_for(&self, model_id: &str) -> Result<Quota, RegistryError> {
        let db = Arc::clone(&self.db);
        let model_id = model_id.to_string();
        tokio::task::spawn_blocking(move || Self::load_or_create_quota(&db, &model_id))
            .await
            .map_err(|e| RegistryError::Database(e.to_string()))?
    }

    fn load_or_create_quota(db: &Database, model_id: &str) -> Result<Quota, RegistryError> {
        if let Some(quota) = Self::load_quota(db, model_id)? {
            return Ok(quota);
        }

        let fresh = Quota::unlimited(model_id);
        // OR IGNORE: a racing handler may have created the row first.
        db.conn().execute(
            "INSERT OR IGNORE INTO quotas (id, model_id, active) VALUES (?, ?, 1)",
            params![&fresh.id, model_id],
        )?;
        debug!(model_id = %model_id, "Created permissive quota row");
        Ok(Self::load_quota(db, model_id)?.unwrap_or(fresh))
    }

    fn load_quota(db: &Database, model_id: &str) -> Result<Option<Quota>, RegistryError> {
        let conn = db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, model_id, max_tokens_per_message, max_tokens_per_minute,
                    max_tokens_per_day, active
             FROM quotas WHERE model_id = ?",
        )?;
        let result = stmt.query_row([model_id], |row| {
            Ok(Quota {
                id: row.get(0)?,
                model_id: row.get(1)?,
                max_tokens_per_message: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
                max_tokens_per_minute: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                max_tokens_per_day: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
                active: row.get::<_, i64>(5)? != 0,
            })
        });
        match result {
            Ok(quota) => Ok(Some(quota)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Save a quota to the database (upsert by model id).
    pub fn save_quota_to_db(db: &Database, quota: &Quota) -> Result<(), RegistryError> {
        db.conn().execute(
            "INSERT INTO quotas (id, model_id, max_tokens_per_message, max_tokens_per_minute,
                max_tokens_per_day, active, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, unixepoch())
             ON CONFLICT(model_id) DO UPDATE SET
                max_tokens_per_message = excluded.max_tokens_per_message,
                max_tokens_per_minute = excluded.max_tokens_per_minute,
                max_tokens_per_day = excluded.max_tokens_per_day,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                &quota.id,
                &quota.model_id,
                quota.max_tokens_per_message.map(|v| v as i64),
                quota.max_tokens_per_minute.map(|v| v as i64),
                quota.max_tokens_per_day.map(|v| v as i64),
                quota.active as i64,
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Usage reads
    // =========================================================================

    /// Current usage across the three windows.
    ///
    /// Missing fast-store keys read as zeros; a fast-store failure degrades
    /// the snapshot to zeros with a warning (informational read).
    pub async fn usage(&self, provider: &str, model: &str) -> Result<UsageSnapshot, RegistryError> {
        let resolved = self.models.normalize(provider, Some(model)).await?;
        match self.snapshot(&resolved).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!(model = %resolved.raw, error = %e, "Fast store unavailable, reporting zero usage");
                Ok(UsageSnapshot::default())
            }
        }
    }

    /// Read all three window buckets for a resolved identity.
    ///
    /// A bucket whose stored window start doesn't match the current window is
    /// a leftover from a previous bucket still inside its TTL grace; it reads
    /// as zero.
    async fn snapshot(&self, resolved: &ResolvedModel) -> Result<UsageSnapshot, CacheError> {
        let Some(provider_id) = resolved.provider_id.as_deref() else {
            return Ok(UsageSnapshot::default());
        };

        let now = Utc::now();
        let mut snapshot = UsageSnapshot::default();
        for kind in WindowKind::all() {
            let key = Self::cache_key(provider_id, &resolved.model_name, *kind);
            if let Some(usage) = self.cache.get(&key).await? {
                if usage.window_start != kind.window_start(now) {
                    continue;
                }
                match kind {
                    WindowKind::Minute => snapshot.minute = usage,
                    WindowKind::Hour => snapshot.hour = usage,
                    WindowKind::Day => snapshot.day = usage,
                }
            }
        }
        Ok(snapshot)
    }

    // =========================================================================
    // Enforcement
    // =========================================================================

    /// Decide whether a request for `requested_tokens` may proceed.
    ///
    /// Evaluates, in order: per-message limit, projected per-minute limit,
    /// projected per-day limit. The first violated dimension short-circuits
    /// into a denial with a human-readable reason. Every internal failure
    /// fails open - enforcement never blocks traffic.
    pub async fn check_quota(
        &self,
        provider: &str,
        model: &str,
        requested_tokens: u64,
    ) -> QuotaCheck {
        let resolved = match self.models.normalize(provider, Some(model)).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(provider = %provider, model = %model, error = %e, "Quota check failed open: resolution error");
                return QuotaCheck::fail_open();
            }
        };

        let identity = match resolved.enforce() {
            Ok(identity) => identity,
            Err(e) => {
                debug!(reference = %resolved.raw, error = %e, "Unknown model reference, request unmetered");
                return QuotaCheck::fail_open();
            }
        };

        let quota = match self.quota_for(&identity.model_id).await {
            Ok(quota) => quota,
            Err(e) => {
                warn!(model_id = %identity.model_id, error = %e, "Quota check failed open: durable store error");
                return QuotaCheck::fail_open();
            }
        };

        let usage = match self.snapshot(&resolved).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(model_id = %identity.model_id, error = %e, "Quota check failed open: fast store error");
                return QuotaCheck::fail_open();
            }
        };

        if !quota.active || quota.is_unlimited() {
            return QuotaCheck::allow(usage, Some(quota));
        }

        if let Some(limit) = quota.max_tokens_per_message {
            if requested_tokens > limit {
                return QuotaCheck::deny(
                    format!(
                        "message limit exceeded: requested {requested_tokens} tokens, \
                         max {limit} per message"
                    ),
                    usage,
                    quota,
                );
            }
        }

        if let Some(limit) = quota.max_tokens_per_minute {
            let projected = usage.minute.total_tokens + requested_tokens;
            if projected > limit {
                return QuotaCheck::deny(
                    format!(
                        "minute limit exceeded: {projected} tokens projected in the \
                         current minute, max {limit}"
                    ),
                    usage,
                    quota,
                );
            }
        }

        if let Some(limit) = quota.max_tokens_per_day {
            let projected = usage.day.total_tokens + requested_tokens;
            if projected > limit {
                return QuotaCheck::deny(
                    format!(
                        "daily limit exceeded: {projected} tokens projected today, \
                         max {limit} per day"
                    ),
                    usage,
                    quota,
                );
            }
        }

        QuotaCheck::allow(usage, Some(quota))
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Record a completed request's token usage. Best effort, never raises.
    ///
    /// Increments all three window buckets in the fast store atomically, and
    /// independently upserts the equivalent durable rows in the background.
    /// Failure of either side is logged and does not affect the other.
    pub async fn record_usage(&self, provider: &str, model: &str, usage: TokenUsage) {
        let resolved = match self.models.normalize(provider, Some(model)).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(provider = %provider, model = %model, error = %e, "Usage not recorded: resolution error");
                return;
            }
        };

        let Some(provider_id) = resolved.provider_id.clone() else {
            debug!(reference = %resolved.raw, "Usage not recorded: unknown provider");
            return;
        };

        let now = Utc::now();
        for kind in WindowKind::all() {
            let key = Self::cache_key(&provider_id, &resolved.model_name, *kind);
            let result = self
                .cache
                .increment(&key, &usage, kind.window_start(now), kind.ttl(self.grace))
                .await;
            if let Err(e) = result {
                warn!(key = %key, error = %e, "Fast-store usage write skipped");
            }
        }

        // Durable accounting runs in the background; the fast-store counters
        // above are what enforcement reads.
        if let Some(model_id) = resolved.model_id.clone() {
            let db = Arc::clone(&self.db);
            tokio::task::spawn_blocking(move || {
                for kind in WindowKind::all() {
                    let result = db.upsert_usage_window(
                        &model_id,
                        kind.as_str(),
                        kind.window_start(now),
                        kind.window_end(now),
                        usage.prompt_tokens as i64,
                        usage.completion_tokens as i64,
                        usage.total_tokens as i64,
                        1,
                    );
                    if let Err(e) = result {
                        warn!(model_id = %model_id, window = %kind, error = %e, "Durable usage upsert failed");
                    }
                }
            });
        } else {
            debug!(reference = %resolved.raw, "Durable usage skipped: unknown model");
        }
    }

    // =========================================================================
    // Read API
    // =========================================================================

    /// Bundle quota, current usage, and the zero-token check result.
    pub async fn usage_report(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<UsageReport, RegistryError> {
        let quota = self.quota(provider, model).await?;
        let usage = self.usage(provider, model).await?;
        let check = self.check_quota(provider, model, 0).await;
        Ok(UsageReport {
            quota: Some(quota),
            usage,
            check,
        })
    }
}

impl std::fmt::Debug for UsageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageService")
            .field("grace", &self.grace)
            .finish()
    }
}
