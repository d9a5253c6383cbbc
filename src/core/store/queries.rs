//! Read models for the admin surface, plus age-based retention.

use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::executions::{EXECUTION_COLUMNS, execution_from_row};
use super::types::{
    ExecutionFilter, ExecutionPage, ExecutionRecord, ExecutionStats, ExecutionStatus, JobDetail,
    JobOverview, StatusBreakdown,
};
use super::{CronStore, format_timestamp, non_negative, normalize_bound};

pub const DEFAULT_PAGE_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 500;

fn breakdown_for_job(db: &Connection, job_id: &str) -> Result<StatusBreakdown> {
    let mut stmt = db.prepare(
        "SELECT status, COUNT(*) FROM cron_job_execution WHERE cron_job_id = ?1 GROUP BY status",
    )?;
    let rows = stmt.query_map(params![job_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut breakdown = StatusBreakdown::default();
    for row in rows {
        let (status, count) = row?;
        if let Some(status) = ExecutionStatus::from_status(&status) {
            breakdown.add(status, non_negative(count));
        }
    }
    Ok(breakdown)
}

fn recent_for_job(db: &Connection, job_id: &str, limit: u64) -> Result<Vec<ExecutionRecord>> {
    let mut stmt = db.prepare(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM cron_job_execution
         WHERE cron_job_id = ?1 ORDER BY started_at DESC, rowid DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![job_id, limit as i64], execution_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Translate a filter into a WHERE clause and its positional arguments.
fn filter_clause(filter: &ExecutionFilter) -> Result<(String, Vec<Value>)> {
    let mut conditions = Vec::new();
    let mut args = Vec::new();

    if let Some(job_id) = &filter.job_id {
        conditions.push("cron_job_id = ?");
        args.push(Value::Text(job_id.clone()));
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?");
        args.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(source) = filter.triggered_by {
        conditions.push("triggered_by = ?");
        args.push(Value::Text(source.as_str().to_string()));
    }
    if let Some(user_id) = &filter.triggered_by_user_id {
        conditions.push("triggered_by_user_id = ?");
        args.push(Value::Text(user_id.clone()));
    }
    if let Some(after) = &filter.started_after {
        conditions.push("started_at >= ?");
        args.push(Value::Text(normalize_bound(after)?));
    }
    if let Some(before) = &filter.started_before {
        conditions.push("started_at <= ?");
        args.push(Value::Text(normalize_bound(before)?));
    }
    if let Some(min) = filter.min_duration_ms {
        conditions.push("duration_ms >= ?");
        args.push(Value::Integer(min as i64));
    }
    if let Some(max) = filter.max_duration_ms {
        conditions.push("duration_ms <= ?");
        args.push(Value::Integer(max as i64));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    Ok((clause, args))
}

impl CronStore {
    /// Every job with its latest attempt and success-rate rollup.
    pub async fn list_job_overviews(&self) -> Result<Vec<JobOverview>> {
        let jobs = self.list_jobs().await?;
        let db = self.db.lock().await;
        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs {
            let breakdown = breakdown_for_job(&db, &job.id)?;
            let latest_execution = recent_for_job(&db, &job.id, 1)?.into_iter().next();
            out.push(JobOverview {
                success_rate: breakdown.success_rate(),
                total_executions: breakdown.total,
                latest_execution,
                job,
            });
        }
        Ok(out)
    }

    pub async fn get_job_detail(&self, job_id: &str, recent: u64) -> Result<Option<JobDetail>> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok(None);
        };
        let db = self.db.lock().await;
        let breakdown = breakdown_for_job(&db, &job.id)?;
        let recent_executions = recent_for_job(&db, &job.id, recent)?;
        Ok(Some(JobDetail {
            success_rate: breakdown.success_rate(),
            breakdown,
            recent_executions,
            job,
        }))
    }

    /// Filtered history, newest first.
    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<ExecutionPage> {
        let (clause, args) = filter_clause(filter)?;
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let db = self.db.lock().await;
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM cron_job_execution {clause}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut page_args = args;
        page_args.push(Value::Integer(limit as i64));
        page_args.push(Value::Integer(offset as i64));
        let mut stmt = db.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM cron_job_execution {clause}
             ORDER BY started_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt.query_map(params_from_iter(page_args.iter()), execution_from_row)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(row?);
        }

        Ok(ExecutionPage {
            executions,
            total: non_negative(total),
            offset,
            limit,
        })
    }

    /// Status histogram over the trailing `days`.
    pub async fn get_execution_stats(&self, days: u32) -> Result<ExecutionStats> {
        let since = format_timestamp(Utc::now() - Duration::days(i64::from(days)));
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT status, COUNT(*) FROM cron_job_execution WHERE started_at >= ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut breakdown = StatusBreakdown::default();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = ExecutionStatus::from_status(&status) {
                breakdown.add(status, non_negative(count));
            }
        }
        let average_duration_ms: Option<f64> = db
            .query_row(
                "SELECT AVG(duration_ms) FROM cron_job_execution
                 WHERE started_at >= ?1 AND duration_ms IS NOT NULL AND status != 'skipped'",
                params![since],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        Ok(ExecutionStats {
            days,
            since,
            success_rate: breakdown.success_rate(),
            breakdown,
            average_duration_ms,
        })
    }

    /// Delete finished attempts that started more than `days` ago.
    pub async fn delete_executions_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = format_timestamp(Utc::now() - Duration::days(i64::from(days)));
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM cron_job_execution WHERE started_at < ?1 AND status != 'running'",
            params![cutoff],
        )?;
        Ok(rows)
    }
}
