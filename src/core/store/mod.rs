//! SQLite persistence for job configuration and execution history.
//!
//! One connection guarded by an async mutex, shared by the scheduler, the
//! engine and the admin API. Statements never hold the lock across an await.

mod executions;
mod jobs;
mod queries;
mod settings;
pub mod types;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[cfg(test)]
pub(crate) use settings::RESTORE_PROGRESS_KEY;
pub use types::{
    CronJobRecord, CronJobSpec, ExecutionFilter, ExecutionFinish, ExecutionPage, ExecutionRecord,
    ExecutionStats, ExecutionStatus, JobDetail, JobOverview, TriggerSource,
};

/// Identity stamped on rows written by the engine itself.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Clone)]
pub struct CronStore {
    db: Arc<Mutex<Connection>>,
}

impl CronStore {
    /// Open (or create) the database file and provision the schema.
    pub async fn open<P: AsRef<Path>>(path: P, auto_migrate: bool) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cron DB: {}", path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self::from_connection(conn);
        if auto_migrate {
            store.migrate().await?;
        }
        info!("Cron store opened at {}", path.display());
        Ok(store)
    }

    /// Wrap an existing connection without touching its schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// Fresh in-memory store with the schema applied.
    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS cron_job (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL UNIQUE,
                description      TEXT NOT NULL DEFAULT '',
                schedule         TEXT NOT NULL,
                is_enabled       INTEGER NOT NULL DEFAULT 1,
                timeout_ms       INTEGER NOT NULL,
                max_retries      INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                created_by       TEXT NOT NULL,
                last_modified_by TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cron_job_execution (
                id                   TEXT PRIMARY KEY,
                cron_job_id          TEXT NOT NULL REFERENCES cron_job(id) ON DELETE CASCADE,
                started_at           TEXT NOT NULL,
                completed_at         TEXT,
                duration_ms          INTEGER,
                status               TEXT NOT NULL CHECK (status IN
                    ('running', 'completed', 'failed', 'timeout', 'cancelled', 'skipped')),
                exit_code            INTEGER,
                output               TEXT,
                error_message        TEXT,
                stack_trace          TEXT,
                triggered_by         TEXT NOT NULL CHECK (triggered_by IN
                    ('scheduler', 'manual', 'api')),
                triggered_by_user_id TEXT,
                retry_count          INTEGER NOT NULL DEFAULT 0,
                memory_usage_mb      REAL,
                cpu_usage_percent    REAL
            );

            CREATE INDEX IF NOT EXISTS idx_cron_execution_job_started
                ON cron_job_execution(cron_job_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_cron_execution_status
                ON cron_job_execution(status);
            CREATE INDEX IF NOT EXISTS idx_cron_execution_started
                ON cron_job_execution(started_at);

            CREATE TABLE IF NOT EXISTS app_setting (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("Failed to initialize cron schema")?;
        Ok(())
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// RFC 3339 with fixed millisecond precision, so string order is time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid RFC3339 timestamp: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Normalize caller-supplied bounds (any RFC 3339 offset) to the stored form.
pub(crate) fn normalize_bound(raw: &str) -> Result<String> {
    Ok(format_timestamp(parse_timestamp(raw)?))
}

/// Map a SQLite integer column that can't legitimately be negative.
pub(crate) fn non_negative(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}
