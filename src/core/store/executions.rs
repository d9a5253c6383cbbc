use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::types::{ExecutionFinish, ExecutionRecord, ExecutionStatus, TriggerSource};
use super::{CronStore, format_timestamp, non_negative, now_timestamp, parse_timestamp};

pub(crate) const EXECUTION_COLUMNS: &str = "id, cron_job_id, started_at, completed_at, duration_ms,
     status, triggered_by, triggered_by_user_id, retry_count, output, error_message,
     stack_trace, exit_code, memory_usage_mb, cpu_usage_percent";

pub(crate) fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status_raw: String = row.get(5)?;
    let source_raw: String = row.get(6)?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        started_at: row.get(2)?,
        completed_at: row.get(3)?,
        duration_ms: row.get::<_, Option<i64>>(4)?.map(non_negative),
        // The CHECK constraints keep unknown values out of the table.
        status: ExecutionStatus::from_status(&status_raw).unwrap_or(ExecutionStatus::Failed),
        triggered_by: TriggerSource::from_source(&source_raw).unwrap_or(TriggerSource::Api),
        triggered_by_user_id: row.get(7)?,
        retry_count: u32::try_from(row.get::<_, i64>(8)?).unwrap_or(0),
        output: row.get(9)?,
        error_message: row.get(10)?,
        stack_trace: row.get(11)?,
        exit_code: row.get(12)?,
        memory_usage_mb: row.get(13)?,
        cpu_usage_percent: row.get(14)?,
    })
}

impl CronStore {
    /// Insert the `running` row for a new attempt.
    pub async fn insert_running_execution(
        &self,
        job_id: &str,
        source: TriggerSource,
        user_id: Option<&str>,
        retry_count: u32,
    ) -> Result<ExecutionRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cron_job_execution
             (id, cron_job_id, started_at, status, triggered_by, triggered_by_user_id, retry_count)
             VALUES (?1, ?2, ?3, 'running', ?4, ?5, ?6)",
            params![
                id,
                job_id,
                now_timestamp(),
                source.as_str(),
                user_id,
                retry_count as i64
            ],
        )
        .context("Failed to insert running execution")?;
        let rec = db.query_row(
            &format!("SELECT {EXECUTION_COLUMNS} FROM cron_job_execution WHERE id = ?1"),
            params![id],
            execution_from_row,
        )?;
        Ok(rec)
    }

    /// Insert an attempt that never ran. It is terminal from the start.
    pub async fn insert_skipped_execution(
        &self,
        job_id: &str,
        source: TriggerSource,
        user_id: Option<&str>,
        retry_count: u32,
        reason: &str,
    ) -> Result<ExecutionRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cron_job_execution
             (id, cron_job_id, started_at, completed_at, duration_ms, status, triggered_by,
              triggered_by_user_id, retry_count, output)
             VALUES (?1, ?2, ?3, ?3, 0, 'skipped', ?4, ?5, ?6, ?7)",
            params![
                id,
                job_id,
                now,
                source.as_str(),
                user_id,
                retry_count as i64,
                reason
            ],
        )
        .context("Failed to insert skipped execution")?;
        let rec = db.query_row(
            &format!("SELECT {EXECUTION_COLUMNS} FROM cron_job_execution WHERE id = ?1"),
            params![id],
            execution_from_row,
        )?;
        Ok(rec)
    }

    /// Move a running attempt to its terminal status. Returns `None` when the
    /// row is missing or already finalized, so each row finalizes once.
    pub async fn finalize_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        finish: &ExecutionFinish,
    ) -> Result<Option<ExecutionRecord>> {
        anyhow::ensure!(
            status.is_terminal() && status != ExecutionStatus::Skipped,
            "cannot finalize execution {id} as '{status}'"
        );
        let db = self.db.lock().await;
        let started_at: Option<String> = db
            .query_row(
                "SELECT started_at FROM cron_job_execution WHERE id = ?1 AND status = 'running'",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(started_at) = started_at else {
            return Ok(None);
        };

        let now = Utc::now();
        let duration_ms = (now - parse_timestamp(&started_at)?)
            .num_milliseconds()
            .max(0);
        db.execute(
            "UPDATE cron_job_execution
             SET status = ?1, completed_at = ?2, duration_ms = ?3, output = ?4,
                 error_message = ?5, stack_trace = ?6, exit_code = ?7,
                 memory_usage_mb = ?8, cpu_usage_percent = ?9
             WHERE id = ?10 AND status = 'running'",
            params![
                status.as_str(),
                format_timestamp(now),
                duration_ms,
                finish.output,
                finish.error_message,
                finish.stack_trace,
                finish.exit_code,
                finish.memory_usage_mb,
                finish.cpu_usage_percent,
                id
            ],
        )
        .with_context(|| format!("Failed to finalize execution {id}"))?;
        let rec = db.query_row(
            &format!("SELECT {EXECUTION_COLUMNS} FROM cron_job_execution WHERE id = ?1"),
            params![id],
            execution_from_row,
        )?;
        Ok(Some(rec))
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let db = self.db.lock().await;
        let rec = db
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM cron_job_execution WHERE id = ?1"),
                params![id],
                execution_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    /// Finalize rows left `running` by a process that no longer exists.
    pub async fn cancel_interrupted_executions(&self, reason: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE cron_job_execution
             SET status = 'cancelled', completed_at = ?1,
                 duration_ms = MAX(0, CAST((julianday(?1) - julianday(started_at)) * 86400000 AS INTEGER)),
                 error_message = ?2
             WHERE status = 'running'",
            params![now_timestamp(), reason],
        )?;
        Ok(rows)
    }

    /// Raw insert used by query tests to place rows at fixed times.
    #[cfg(test)]
    pub(crate) async fn insert_execution_record(&self, rec: &ExecutionRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cron_job_execution
             (id, cron_job_id, started_at, completed_at, duration_ms, status, triggered_by,
              triggered_by_user_id, retry_count, output, error_message, stack_trace, exit_code,
              memory_usage_mb, cpu_usage_percent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                rec.id,
                rec.job_id,
                rec.started_at,
                rec.completed_at,
                rec.duration_ms.map(|d| d as i64),
                rec.status.as_str(),
                rec.triggered_by.as_str(),
                rec.triggered_by_user_id,
                rec.retry_count as i64,
                rec.output,
                rec.error_message,
                rec.stack_trace,
                rec.exit_code,
                rec.memory_usage_mb,
                rec.cpu_usage_percent
            ],
        )?;
        Ok(())
    }
}
