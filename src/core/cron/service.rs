use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::engine::{Dispatch, EngineSettings, ExecutionEngine, RESTORE_SKIP_REASON, TriggerError};
use super::reconcile::{ReconcileReport, reconcile_jobs};
use super::registry::{JobDefinition, JobRegistry};
use super::schedule::{ScheduleResolver, normalize_expression};
use super::types::TriggerResponse;
use crate::core::jobs::ops::BookkeepingOps;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::{
    CronJobRecord, CronStore, ExecutionFilter, ExecutionPage, ExecutionRecord, ExecutionStats,
    JobDetail, JobOverview, TriggerSource,
};

pub const INTERRUPTED_REASON: &str = "Interrupted by process restart";
pub const RECENT_EXECUTIONS: u64 = 10;

/// Admin surface over the registry, the store, the engine and the live
/// scheduler. One instance owns its trigger map.
pub struct CronService {
    store: CronStore,
    registry: Arc<JobRegistry>,
    engine: ExecutionEngine,
    resolver: ScheduleResolver,
    scheduler: JobScheduler,
    /// Live scheduler handles keyed by job record id.
    triggers: Mutex<HashMap<String, Uuid>>,
}

impl CronService {
    pub async fn new(
        store: CronStore,
        registry: JobRegistry,
        ops: Arc<dyn BookkeepingOps>,
        settings: EngineSettings,
        resolver: ScheduleResolver,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        let engine = ExecutionEngine::new(store.clone(), ops, settings);
        Ok(Self {
            store,
            registry: Arc::new(registry),
            engine,
            resolver,
            scheduler,
            triggers: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &CronStore {
        &self.store
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Recover, sync definitions, register triggers and start the scheduler.
    pub async fn initialize(&self) -> Result<ReconcileReport> {
        if self.store.table_exists("cron_job_execution").await? {
            let recovered = self
                .store
                .cancel_interrupted_executions(INTERRUPTED_REASON)
                .await?;
            if recovered > 0 {
                warn!("Marked {} interrupted cron executions as cancelled", recovered);
            }
        }

        let report = reconcile_jobs(&self.store, &self.registry, &self.resolver).await;
        if !report.skipped {
            self.schedule_enabled_jobs().await;
        }
        self.scheduler.start().await?;
        info!(
            "Cron service started with {} active trigger(s)",
            self.triggers.lock().await.len()
        );
        Ok(report)
    }

    async fn schedule_enabled_jobs(&self) {
        let jobs = match self.store.list_enabled_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to load enabled cron jobs: {:#}", e);
                return;
            }
        };
        for job in jobs {
            let Some(def) = self.registry.get(&job.name) else {
                warn!(
                    "Cron job '{}' has no definition in this build, not scheduling",
                    job.name
                );
                continue;
            };
            if let Err(e) = self.register_trigger(&job, def).await {
                error!("Failed to schedule cron job '{}': {:#}", job.name, e);
            }
        }
    }

    async fn register_trigger(&self, job: &CronJobRecord, def: Arc<JobDefinition>) -> Result<()> {
        let expression = normalize_expression(&job.schedule)?;
        let engine = self.engine.clone();
        let job_id = job.id.clone();

        let cron_job = Job::new_async(expression.as_str(), move |_uuid, mut _l| {
            let engine = engine.clone();
            let def = def.clone();
            let job_id = job_id.clone();

            Box::pin(async move {
                if engine.is_running(&job_id) {
                    info!(
                        "Cron job {} still running execution {}, skipping this fire",
                        job_id,
                        engine.running_execution(&job_id).unwrap_or_default()
                    );
                    return;
                }
                // Fresh read so operator edits since registration apply.
                let job = match engine.store().get_job(&job_id).await {
                    Ok(Some(job)) if job.is_enabled => job,
                    Ok(_) => return,
                    Err(e) => {
                        error!("Failed to load cron job {}: {:#}", job_id, e);
                        return;
                    }
                };
                if let Err(e) = engine
                    .trigger(def, job, TriggerSource::Scheduler, None, 0)
                    .await
                {
                    match e {
                        TriggerError::AlreadyRunning | TriggerError::ShuttingDown => {}
                        other => error!("Scheduled run of cron job {} failed: {}", job_id, other),
                    }
                }
            })
        })?;

        let handle = self.scheduler.add(cron_job).await?;
        let previous = self.triggers.lock().await.insert(job.id.clone(), handle);
        if let Some(previous) = previous
            && let Err(e) = self.scheduler.remove(&previous).await
        {
            warn!("Failed to remove stale trigger for '{}': {}", job.name, e);
        }
        info!("Scheduled cron job '{}': {}", job.name, job.schedule);
        Ok(())
    }

    async fn cancel_trigger(&self, job_id: &str) {
        let handle = self.triggers.lock().await.remove(job_id);
        if let Some(handle) = handle
            && let Err(e) = self.scheduler.remove(&handle).await
        {
            warn!("Failed to remove trigger for cron job {}: {}", job_id, e);
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_scheduled(&self, job_id: &str) -> bool {
        self.triggers.lock().await.contains_key(job_id)
    }

    /// Cancel triggers, drop pending retries, wait for running executions,
    /// then stop the scheduler.
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<(String, Uuid)> = self.triggers.lock().await.drain().collect();
        for (job_id, handle) in handles {
            if let Err(e) = self.scheduler.remove(&handle).await {
                warn!("Failed to remove trigger for cron job {}: {}", job_id, e);
            }
        }
        self.engine.shutdown().await;
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        info!("Cron service stopped");
        Ok(())
    }

    /// Manual or API trigger. Returns once the execution row exists.
    pub async fn trigger_job(
        &self,
        job_id: &str,
        user_id: Option<&str>,
        source: TriggerSource,
    ) -> TriggerResponse {
        match self.dispatch(job_id, user_id, source).await {
            Ok(Dispatch::Started(execution_id)) => TriggerResponse::started(execution_id),
            Ok(Dispatch::Skipped(execution_id)) => {
                TriggerResponse::skipped(execution_id, RESTORE_SKIP_REASON)
            }
            Err(e) => TriggerResponse::rejected(e.to_string()),
        }
    }

    async fn dispatch(
        &self,
        job_id: &str,
        user_id: Option<&str>,
        source: TriggerSource,
    ) -> Result<Dispatch, TriggerError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(TriggerError::NotFound)?;
        let def = self
            .registry
            .get(&job.name)
            .ok_or(TriggerError::DefinitionNotFound)?;
        self.engine
            .trigger(def, job, source, user_id.map(str::to_string), 0)
            .await
    }

    /// Persist the operator's enable flag and add or remove the live trigger.
    pub async fn update_job_status(
        &self,
        job_id: &str,
        is_enabled: bool,
        modified_by: &str,
    ) -> Result<Option<CronJobRecord>> {
        let Some(job) = self
            .store
            .set_job_enabled(job_id, is_enabled, modified_by)
            .await?
        else {
            return Ok(None);
        };

        if is_enabled {
            match self.registry.get(&job.name) {
                Some(def) => {
                    if let Err(e) = self.register_trigger(&job, def).await {
                        error!("Failed to schedule cron job '{}': {:#}", job.name, e);
                    }
                }
                None => warn!(
                    "Cron job '{}' enabled but has no definition in this build",
                    job.name
                ),
            }
        } else {
            self.cancel_trigger(&job.id).await;
        }
        info!(
            "Cron job '{}' {} by {}",
            job.name,
            if is_enabled { "enabled" } else { "disabled" },
            modified_by
        );
        Ok(Some(job))
    }

    pub async fn get_all_jobs(&self) -> Result<Vec<JobOverview>> {
        self.store.list_job_overviews().await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobDetail>> {
        self.store.get_job_detail(job_id, RECENT_EXECUTIONS).await
    }

    pub async fn get_execution_history(&self, filter: &ExecutionFilter) -> Result<ExecutionPage> {
        self.store.list_executions(filter).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        self.store.get_execution(execution_id).await
    }

    pub async fn get_stats(&self, days: u32) -> Result<ExecutionStats> {
        self.store.get_execution_stats(days).await
    }

    pub async fn cleanup_old_executions(&self, older_than_days: u32) -> Result<usize> {
        let deleted = self.store.delete_executions_older_than(older_than_days).await?;
        info!(
            "Deleted {} cron executions older than {} days",
            deleted, older_than_days
        );
        Ok(deleted)
    }
}

/// Lifecycle adapter: initialize on start, drain on shutdown.
pub struct CronComponent {
    service: Arc<CronService>,
}

impl CronComponent {
    pub fn new(service: Arc<CronService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for CronComponent {
    async fn on_start(&mut self) -> Result<()> {
        let report = self.service.initialize().await?;
        if !report.failed.is_empty() {
            warn!("Cron jobs failed to sync: {}", report.failed.join(", "));
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.service.shutdown().await
    }
}
