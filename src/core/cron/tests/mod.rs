mod engine_flow;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::{EngineSettings, ExecutionEngine, JobDefinition};
use crate::core::jobs::ops::{BookkeepingOps, OperationReport};
use crate::core::store::{
    CronJobRecord, CronJobSpec, CronStore, ExecutionFilter, ExecutionRecord, ExecutionStatus,
    SYSTEM_ACTOR,
};

/// Operations double that reports success for everything.
pub(crate) struct StubOps;

#[async_trait::async_trait]
impl BookkeepingOps for StubOps {
    async fn create_backup(&self, _correlation_id: &str) -> Result<OperationReport> {
        Ok(OperationReport::done("backup"))
    }
    async fn process_imports(&self, _correlation_id: &str) -> Result<OperationReport> {
        Ok(OperationReport::done("imports"))
    }
    async fn categorize_transactions(
        &self,
        _correlation_id: &str,
        _batch_size: u32,
    ) -> Result<OperationReport> {
        Ok(OperationReport::done("categorize"))
    }
    async fn prune_sessions(&self, _correlation_id: &str) -> Result<OperationReport> {
        Ok(OperationReport::done("sessions"))
    }
    async fn refresh_filters(&self, _correlation_id: &str) -> Result<OperationReport> {
        Ok(OperationReport::done("filters"))
    }
    async fn check_files(&self, _correlation_id: &str) -> Result<OperationReport> {
        Ok(OperationReport::done("files"))
    }
}

pub(super) fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        shutdown_grace: Duration::from_secs(5),
    }
}

pub(super) fn test_engine(store: &CronStore, settings: EngineSettings) -> ExecutionEngine {
    ExecutionEngine::new(store.clone(), Arc::new(StubOps), settings)
}

/// Persist a record matching `def` the way reconciliation would.
pub(super) async fn persist(store: &CronStore, def: &JobDefinition) -> CronJobRecord {
    store
        .insert_job(
            &CronJobSpec {
                name: def.name.clone(),
                description: def.description.clone(),
                schedule: def.schedule.clone(),
                is_enabled: def.is_enabled,
                timeout_ms: def.timeout_ms,
                max_retries: def.max_retries,
            },
            SYSTEM_ACTOR,
        )
        .await
        .unwrap()
}

pub(super) async fn executions_for(store: &CronStore, job_id: &str) -> Vec<ExecutionRecord> {
    let mut rows = store
        .list_executions(&ExecutionFilter {
            job_id: Some(job_id.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .executions;
    rows.sort_by_key(|r| r.retry_count);
    rows
}

/// Poll until the execution leaves `running`.
pub(super) async fn wait_for_terminal(store: &CronStore, execution_id: &str) -> ExecutionRecord {
    for _ in 0..400 {
        let rec = store.get_execution(execution_id).await.unwrap().unwrap();
        if rec.status != ExecutionStatus::Running {
            return rec;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never finished");
}
