use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::types::{CronJobRecord, CronJobSpec};
use super::{CronStore, non_negative, now_timestamp};

const JOB_COLUMNS: &str = "id, name, description, schedule, is_enabled, timeout_ms, max_retries,
     created_at, updated_at, created_by, last_modified_by";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<CronJobRecord> {
    Ok(CronJobRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        schedule: row.get(3)?,
        is_enabled: row.get::<_, i64>(4)? != 0,
        timeout_ms: non_negative(row.get(5)?),
        max_retries: u32::try_from(row.get::<_, i64>(6)?).unwrap_or(0),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        created_by: row.get(9)?,
        last_modified_by: row.get(10)?,
    })
}

impl CronStore {
    pub async fn get_job(&self, id: &str) -> Result<Option<CronJobRecord>> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM cron_job WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub async fn get_job_by_name(&self, name: &str) -> Result<Option<CronJobRecord>> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM cron_job WHERE name = ?1"),
                params![name],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub async fn list_jobs(&self) -> Result<Vec<CronJobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM cron_job ORDER BY name ASC"
        ))?;
        let rows = stmt.query_map([], job_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_enabled_jobs(&self) -> Result<Vec<CronJobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM cron_job WHERE is_enabled = 1 ORDER BY name ASC"
        ))?;
        let rows = stmt.query_map([], job_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn insert_job(&self, spec: &CronJobSpec, actor: &str) -> Result<CronJobRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cron_job
             (id, name, description, schedule, is_enabled, timeout_ms, max_retries,
              created_at, updated_at, created_by, last_modified_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9, ?9)",
            params![
                id,
                spec.name,
                spec.description,
                spec.schedule,
                spec.is_enabled as i64,
                spec.timeout_ms as i64,
                spec.max_retries as i64,
                now,
                actor
            ],
        )
        .with_context(|| format!("Failed to insert cron job '{}'", spec.name))?;
        let job = db.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM cron_job WHERE id = ?1"),
            params![id],
            job_from_row,
        )?;
        Ok(job)
    }

    /// Overwrite the code-owned fields of an existing job. `is_enabled`
    /// belongs to the operator and is never written here.
    pub async fn sync_job(&self, id: &str, spec: &CronJobSpec, actor: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db
            .execute(
                "UPDATE cron_job
                 SET description = ?1, schedule = ?2, timeout_ms = ?3, max_retries = ?4,
                     updated_at = ?5, last_modified_by = ?6
                 WHERE id = ?7",
                params![
                    spec.description,
                    spec.schedule,
                    spec.timeout_ms as i64,
                    spec.max_retries as i64,
                    now_timestamp(),
                    actor,
                    id
                ],
            )
            .with_context(|| format!("Failed to sync cron job '{}'", spec.name))?;
        Ok(rows > 0)
    }

    pub async fn set_job_enabled(
        &self,
        id: &str,
        is_enabled: bool,
        actor: &str,
    ) -> Result<Option<CronJobRecord>> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE cron_job SET is_enabled = ?1, updated_at = ?2, last_modified_by = ?3
             WHERE id = ?4",
            params![is_enabled as i64, now_timestamp(), actor, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        let job = db.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM cron_job WHERE id = ?1"),
            params![id],
            job_from_row,
        )?;
        Ok(Some(job))
    }
}
