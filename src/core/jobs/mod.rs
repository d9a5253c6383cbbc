//! Built-in maintenance jobs shipped with the bookkeeping app.

pub mod ops;

use anyhow::Result;
use std::future::Future;
use std::time::Instant;
use tracing::debug;

use crate::core::cron::{JobBody, JobContext, JobDefinition, JobMetrics, JobOutput, JobRegistry};
use ops::OperationReport;

/// Knobs the catalog reads from configuration.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub categorize_batch_size: u32,
    pub retention_days: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            categorize_batch_size: 50,
            retention_days: 30,
        }
    }
}

/// Await `op`, giving up if the attempt is cancelled first.
async fn until_cancelled<T>(ctx: &JobContext, op: impl Future<Output = Result<T>>) -> Result<T> {
    debug!(
        job = %ctx.job_name,
        actor = %ctx.actor,
        attempt = ctx.retry_count,
        correlation_id = %ctx.correlation_id,
        "Calling host maintenance operation"
    );
    tokio::select! {
        result = op => result,
        _ = ctx.cancel.cancelled() => anyhow::bail!("Job '{}' was cancelled", ctx.job_name),
    }
}

fn report_to_output(report: OperationReport, started: Instant) -> JobOutput {
    JobOutput {
        success: report.success,
        message: report.message,
        data: report.data,
        metrics: Some(JobMetrics {
            items_processed: report.items_processed,
            execution_time_ms: Some(started.elapsed().as_millis() as u64),
            memory_usage_mb: None,
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum Maintenance {
    Backup,
    Imports,
    Sessions,
    Filters,
    FileCheck,
}

/// Body that delegates to one host maintenance operation.
struct MaintenanceJob {
    op: Maintenance,
}

#[async_trait::async_trait]
impl JobBody for MaintenanceJob {
    async fn run(&self, ctx: JobContext) -> Result<JobOutput> {
        let started = Instant::now();
        let ops = ctx.ops.clone();
        let id = ctx.correlation_id.as_str();
        let report = match self.op {
            Maintenance::Backup => until_cancelled(&ctx, ops.create_backup(id)).await?,
            Maintenance::Imports => until_cancelled(&ctx, ops.process_imports(id)).await?,
            Maintenance::Sessions => until_cancelled(&ctx, ops.prune_sessions(id)).await?,
            Maintenance::Filters => until_cancelled(&ctx, ops.refresh_filters(id)).await?,
            Maintenance::FileCheck => until_cancelled(&ctx, ops.check_files(id)).await?,
        };
        Ok(report_to_output(report, started))
    }
}

struct CategorizeJob {
    batch_size: u32,
}

#[async_trait::async_trait]
impl JobBody for CategorizeJob {
    async fn run(&self, ctx: JobContext) -> Result<JobOutput> {
        let started = Instant::now();
        let ops = ctx.ops.clone();
        let report = until_cancelled(
            &ctx,
            ops.categorize_transactions(&ctx.correlation_id, self.batch_size),
        )
        .await?;
        Ok(report_to_output(report, started))
    }
}

/// Age-based retention for the execution history itself.
struct CleanupExecutionsJob {
    retention_days: u32,
}

#[async_trait::async_trait]
impl JobBody for CleanupExecutionsJob {
    async fn run(&self, ctx: JobContext) -> Result<JobOutput> {
        let started = Instant::now();
        let deleted = ctx
            .store
            .delete_executions_older_than(self.retention_days)
            .await?;
        Ok(JobOutput::ok(format!(
            "Deleted {} executions older than {} days",
            deleted, self.retention_days
        ))
        .with_data(serde_json::json!({
            "deleted": deleted,
            "retentionDays": self.retention_days,
        }))
        .with_metrics(JobMetrics {
            items_processed: Some(deleted as u64),
            execution_time_ms: Some(started.elapsed().as_millis() as u64),
            memory_usage_mb: None,
        }))
    }
}

pub fn builtin_registry(settings: &CatalogSettings) -> Result<JobRegistry> {
    let mut registry = JobRegistry::new();

    registry.register(
        JobDefinition::new(
            "backup-database",
            "${CRON_BACKUP_SCHEDULE}",
            MaintenanceJob {
                op: Maintenance::Backup,
            },
        )
        .description("Create a full database backup")
        .default_value("CRON_BACKUP_SCHEDULE", "0 2 * * *")
        .timeout_ms(300_000)
        .max_retries(2),
    )?;

    registry.register(
        JobDefinition::new(
            "process-imports",
            "${CRON_IMPORTS_SCHEDULE}",
            MaintenanceJob {
                op: Maintenance::Imports,
            },
        )
        .description("Process queued bank statement imports")
        .default_value("CRON_IMPORTS_SCHEDULE", "*/15 * * * *")
        .timeout_ms(600_000)
        .max_retries(1),
    )?;

    registry.register(
        JobDefinition::new(
            "categorize-transactions",
            "${CRON_CATEGORIZE_SCHEDULE}",
            CategorizeJob {
                batch_size: settings.categorize_batch_size,
            },
        )
        .description("Suggest categories for uncategorized transactions")
        .default_value("CRON_CATEGORIZE_SCHEDULE", "0 * * * *")
        .timeout_ms(900_000)
        .max_retries(1),
    )?;

    registry.register(
        JobDefinition::new(
            "prune-sessions",
            "${CRON_SESSIONS_SCHEDULE}",
            MaintenanceJob {
                op: Maintenance::Sessions,
            },
        )
        .description("Delete expired login sessions")
        .default_value("CRON_SESSIONS_SCHEDULE", "0 * * * *")
        .timeout_ms(60_000),
    )?;

    registry.register(
        JobDefinition::new(
            "refresh-filters",
            "${CRON_FILTERS_SCHEDULE}",
            MaintenanceJob {
                op: Maintenance::Filters,
            },
        )
        .description("Rebuild cached saved-filter results")
        .default_value("CRON_FILTERS_SCHEDULE", "*/30 * * * *")
        .timeout_ms(120_000)
        .max_retries(1),
    )?;

    registry.register(
        JobDefinition::new(
            "check-import-files",
            "${CRON_FILE_CHECK_SCHEDULE}",
            MaintenanceJob {
                op: Maintenance::FileCheck,
            },
        )
        .description("Verify import drop folders and stored attachments")
        .default_value("CRON_FILE_CHECK_SCHEDULE", "0 */6 * * *")
        .timeout_ms(300_000)
        .max_retries(1),
    )?;

    registry.register(
        JobDefinition::new(
            "cleanup-cron-executions",
            "${CRON_RETENTION_SCHEDULE}",
            CleanupExecutionsJob {
                retention_days: settings.retention_days,
            },
        )
        .description("Delete old cron execution history")
        .default_value("CRON_RETENTION_SCHEDULE", "30 3 * * *")
        .timeout_ms(120_000),
    )?;

    Ok(registry)
}
