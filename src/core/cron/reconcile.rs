use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use super::registry::{JobDefinition, JobRegistry};
use super::schedule::ScheduleResolver;
use crate::core::store::{CronJobSpec, CronStore, SYSTEM_ACTOR};

/// Outcome of one pass that mirrors definitions into the job table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<String>,
    /// Set when the job table was missing and nothing was attempted.
    pub skipped: bool,
}

enum SyncAction {
    Created,
    Updated,
}

async fn sync_definition(
    store: &CronStore,
    resolver: &ScheduleResolver,
    def: &JobDefinition,
) -> Result<SyncAction> {
    let schedule = resolver.resolve(&def.schedule, &def.defaults)?;
    let spec = CronJobSpec {
        name: def.name.clone(),
        description: def.description.clone(),
        schedule,
        is_enabled: def.is_enabled,
        timeout_ms: def.timeout_ms,
        max_retries: def.max_retries,
    };
    match store.get_job_by_name(&def.name).await? {
        Some(existing) => {
            store.sync_job(&existing.id, &spec, SYSTEM_ACTOR).await?;
            Ok(SyncAction::Updated)
        }
        None => {
            store.insert_job(&spec, SYSTEM_ACTOR).await?;
            Ok(SyncAction::Created)
        }
    }
}

/// Mirror every registered definition into the job table, keyed by name.
/// Failures are per definition; the rest of the pass continues.
pub async fn reconcile_jobs(
    store: &CronStore,
    registry: &JobRegistry,
    resolver: &ScheduleResolver,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    match store.table_exists("cron_job").await {
        Ok(true) => {}
        Ok(false) => {
            warn!("cron_job table not provisioned; skipping job sync");
            report.skipped = true;
            return report;
        }
        Err(e) => {
            warn!("Could not inspect schema, skipping job sync: {}", e);
            report.skipped = true;
            return report;
        }
    }

    for def in registry.iter() {
        match sync_definition(store, resolver, def).await {
            Ok(SyncAction::Created) => {
                info!("Registered cron job '{}'", def.name);
                report.created.push(def.name.clone());
            }
            Ok(SyncAction::Updated) => report.updated.push(def.name.clone()),
            Err(e) => {
                error!("Failed to sync cron job '{}': {:#}", def.name, e);
                report.failed.push(def.name.clone());
            }
        }
    }

    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        failed = report.failed.len(),
        "Cron job sync finished"
    );
    report
}
