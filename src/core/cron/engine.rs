//! Runs one attempt of a job: claim, gate, record, race the timeout,
//! finalize, and chain a retry when the attempt failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::registry::JobDefinition;
use super::types::{JobContext, JobOutput};
use crate::core::jobs::ops::BookkeepingOps;
use crate::core::store::{
    CronJobRecord, CronStore, ExecutionFinish, ExecutionRecord, ExecutionStatus, SYSTEM_ACTOR,
    TriggerSource,
};

pub const RESTORE_SKIP_REASON: &str = "Skipped: backup restore in progress";

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Cron job not found")]
    NotFound,
    #[error("Cron job definition not found")]
    DefinitionNotFound,
    #[error("Cron job is already running")]
    AlreadyRunning,
    #[error("Cron service is shutting down")]
    ShuttingDown,
    #[error("Failed to record execution: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// How long shutdown waits for running bodies before cancelling them.
    pub shutdown_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(1_000),
            retry_max_delay: Duration::from_millis(30_000),
            shutdown_grace: Duration::from_millis(30_000),
        }
    }
}

impl EngineSettings {
    /// Delay before retrying an attempt that carried `retry_count`.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// What a trigger produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A `running` row exists and the body is executing in the background.
    Started(String),
    /// The restore gate wrote a `skipped` row instead.
    Skipped(String),
}

#[cfg(test)]
impl Dispatch {
    pub(crate) fn execution_id(&self) -> &str {
        match self {
            Dispatch::Started(id) | Dispatch::Skipped(id) => id,
        }
    }
}

type InFlight = Arc<Mutex<HashMap<String, String>>>;

fn lock_in_flight(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Claim on a job id. Dropping it releases the claim on every exit path.
struct InFlightGuard {
    in_flight: InFlight,
    job_id: String,
}

impl InFlightGuard {
    fn record(&self, execution_id: &str) {
        lock_in_flight(&self.in_flight).insert(self.job_id.clone(), execution_id.to_string());
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.job_id);
    }
}

enum Outcome {
    Finished(Result<anyhow::Result<JobOutput>, JoinError>),
    TimedOut,
    Interrupted,
}

struct EngineInner {
    store: CronStore,
    ops: Arc<dyn BookkeepingOps>,
    settings: EngineSettings,
    in_flight: InFlight,
    tracker: TaskTracker,
    /// Refuses new triggers and drops pending retries.
    stopping: CancellationToken,
    /// Cancels bodies that outlive the shutdown grace period.
    abort: CancellationToken,
}

#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn new(store: CronStore, ops: Arc<dyn BookkeepingOps>, settings: EngineSettings) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                ops,
                settings,
                in_flight: Arc::new(Mutex::new(HashMap::new())),
                tracker: TaskTracker::new(),
                stopping: CancellationToken::new(),
                abort: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &CronStore {
        &self.inner.store
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        lock_in_flight(&self.inner.in_flight).contains_key(job_id)
    }

    /// Execution id currently holding the claim on `job_id`.
    pub fn running_execution(&self, job_id: &str) -> Option<String> {
        lock_in_flight(&self.inner.in_flight)
            .get(job_id)
            .filter(|id| !id.is_empty())
            .cloned()
    }

    fn claim(&self, job_id: &str) -> Result<InFlightGuard, TriggerError> {
        let mut map = lock_in_flight(&self.inner.in_flight);
        if map.contains_key(job_id) {
            return Err(TriggerError::AlreadyRunning);
        }
        map.insert(job_id.to_string(), String::new());
        Ok(InFlightGuard {
            in_flight: self.inner.in_flight.clone(),
            job_id: job_id.to_string(),
        })
    }

    /// Start one attempt. Returns as soon as the execution row exists.
    pub async fn trigger(
        &self,
        def: Arc<JobDefinition>,
        job: CronJobRecord,
        source: TriggerSource,
        user_id: Option<String>,
        retry_count: u32,
    ) -> Result<Dispatch, TriggerError> {
        if self.inner.stopping.is_cancelled() {
            return Err(TriggerError::ShuttingDown);
        }
        let guard = match self.claim(&job.id) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(
                    "Cron job '{}' is already running, ignoring {} trigger",
                    job.name, source
                );
                return Err(e);
            }
        };

        let store = &self.inner.store;
        if store.restore_in_progress().await? {
            let rec = store
                .insert_skipped_execution(
                    &job.id,
                    source,
                    user_id.as_deref(),
                    retry_count,
                    RESTORE_SKIP_REASON,
                )
                .await?;
            info!(
                job = %job.name,
                execution_id = %rec.id,
                "Backup restore in progress, skipping cron job"
            );
            return Ok(Dispatch::Skipped(rec.id));
        }

        let rec = store
            .insert_running_execution(&job.id, source, user_id.as_deref(), retry_count)
            .await?;
        guard.record(&rec.id);
        info!(
            job = %job.name,
            execution_id = %rec.id,
            source = %source,
            retry_count,
            "Cron job started"
        );

        let execution_id = rec.id.clone();
        let engine = self.clone();
        self.inner
            .tracker
            .spawn(engine.run_attempt(def, job, rec, user_id, guard));
        Ok(Dispatch::Started(execution_id))
    }

    async fn run_attempt(
        self,
        def: Arc<JobDefinition>,
        job: CronJobRecord,
        rec: ExecutionRecord,
        user_id: Option<String>,
        guard: InFlightGuard,
    ) {
        let cancel = self.inner.abort.child_token();
        let ctx = JobContext {
            store: self.inner.store.clone(),
            ops: self.inner.ops.clone(),
            actor: SYSTEM_ACTOR.to_string(),
            correlation_id: rec.id.clone(),
            job_name: job.name.clone(),
            retry_count: rec.retry_count,
            cancel: cancel.clone(),
        };
        let body = def.body.clone();
        let mut handle = tokio::spawn(async move { body.run(ctx).await });
        let limit = Duration::from_millis(job.timeout_ms);

        let outcome = tokio::select! {
            joined = tokio::time::timeout(limit, &mut handle) => match joined {
                Ok(result) => Outcome::Finished(result),
                Err(_) => Outcome::TimedOut,
            },
            _ = self.inner.abort.cancelled() => Outcome::Interrupted,
        };

        let (status, finish) = match outcome {
            Outcome::Finished(Ok(Ok(output))) => finish_from_output(output),
            Outcome::Finished(Ok(Err(e))) => finish_from_error(&e),
            Outcome::Finished(Err(join_err)) => finish_from_join_error(join_err),
            Outcome::TimedOut => {
                cancel.cancel();
                handle.abort();
                (
                    ExecutionStatus::Timeout,
                    ExecutionFinish {
                        error_message: Some(format!(
                            "Job exceeded timeout of {}ms",
                            job.timeout_ms
                        )),
                        ..Default::default()
                    },
                )
            }
            Outcome::Interrupted => {
                cancel.cancel();
                handle.abort();
                (
                    ExecutionStatus::Cancelled,
                    ExecutionFinish {
                        error_message: Some("Cancelled by service shutdown".to_string()),
                        ..Default::default()
                    },
                )
            }
        };

        let duration_ms = match self
            .inner
            .store
            .finalize_execution(&rec.id, status, &finish)
            .await
        {
            Ok(Some(done)) => done.duration_ms,
            Ok(None) => {
                warn!("Execution {} was finalized elsewhere", rec.id);
                None
            }
            Err(e) => {
                error!("Failed to finalize execution {}: {:#}", rec.id, e);
                None
            }
        };

        match status {
            ExecutionStatus::Completed => info!(
                job = %job.name,
                execution_id = %rec.id,
                status = %status,
                duration_ms,
                retry_count = rec.retry_count,
                "Cron job finished"
            ),
            _ => warn!(
                job = %job.name,
                execution_id = %rec.id,
                status = %status,
                duration_ms,
                retry_count = rec.retry_count,
                error = finish.error_message.as_deref().unwrap_or(""),
                "Cron job did not complete"
            ),
        }

        // Release before chaining so the retry can claim the job.
        drop(guard);

        if !status.is_retryable() {
            return;
        }
        if rec.retry_count < job.max_retries {
            self.schedule_retry(def, job.id, rec.triggered_by, user_id, rec.retry_count);
        } else if job.max_retries > 0 {
            warn!(
                "Cron job '{}' exhausted its {} retries",
                job.name, job.max_retries
            );
        }
    }

    fn schedule_retry(
        &self,
        def: Arc<JobDefinition>,
        job_id: String,
        source: TriggerSource,
        user_id: Option<String>,
        failed_retry_count: u32,
    ) {
        let delay = self.inner.settings.retry_delay(failed_retry_count);
        let next = failed_retry_count + 1;
        info!(
            "Retrying cron job '{}' in {}ms (retry {})",
            def.name,
            delay.as_millis(),
            next
        );
        let engine = self.clone();
        let stopping = self.inner.stopping.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = stopping.cancelled() => {
                    warn!("Dropping pending retry {} of cron job '{}'", next, def.name);
                }
                _ = tokio::time::sleep(delay) => {
                    engine.run_retry(def, job_id, source, user_id, next).await;
                }
            }
        });
    }

    async fn run_retry(
        self,
        def: Arc<JobDefinition>,
        job_id: String,
        source: TriggerSource,
        user_id: Option<String>,
        retry_count: u32,
    ) {
        let job = match self.inner.store.get_job(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Cron job {} disappeared before retry {}", job_id, retry_count);
                return;
            }
            Err(e) => {
                error!("Failed to load cron job {} for retry: {:#}", job_id, e);
                return;
            }
        };
        if let Err(e) = self.trigger(def, job, source, user_id, retry_count).await {
            warn!("Retry {} of cron job {} not started: {}", retry_count, job_id, e);
        }
    }

    /// Stop accepting work, drop pending retries, and wait for running bodies.
    pub async fn shutdown(&self) {
        self.inner.stopping.cancel();
        self.inner.tracker.close();
        let grace = self.inner.settings.shutdown_grace;
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Cron executions still running after {}ms, cancelling",
                grace.as_millis()
            );
            self.inner.abort.cancel();
            self.inner.tracker.wait().await;
        }
    }

    /// Wait until every attempt and pending retry chain has finished.
    #[cfg(test)]
    pub(crate) async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }
}

fn finish_from_output(output: JobOutput) -> (ExecutionStatus, ExecutionFinish) {
    let memory_usage_mb = output.metrics.as_ref().and_then(|m| m.memory_usage_mb);
    if output.success {
        (
            ExecutionStatus::Completed,
            ExecutionFinish {
                output: output.render_output(),
                exit_code: Some(0),
                memory_usage_mb,
                ..Default::default()
            },
        )
    } else {
        (
            ExecutionStatus::Failed,
            ExecutionFinish {
                error_message: Some(
                    output
                        .message
                        .unwrap_or_else(|| "Job reported failure".to_string()),
                ),
                exit_code: Some(1),
                memory_usage_mb,
                ..Default::default()
            },
        )
    }
}

fn finish_from_error(e: &anyhow::Error) -> (ExecutionStatus, ExecutionFinish) {
    (
        ExecutionStatus::Failed,
        ExecutionFinish {
            error_message: Some(format!("{e:#}")),
            stack_trace: Some(format!("{e:?}")),
            exit_code: Some(1),
            ..Default::default()
        },
    )
}

/// A body task that died without returning; keeps the panic payload.
fn finish_from_join_error(join_err: tokio::task::JoinError) -> (ExecutionStatus, ExecutionFinish) {
    let summary = join_err.to_string();
    let payload = match join_err.try_into_panic() {
        Ok(panic) => panic
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string()),
        Err(join_err) => join_err.to_string(),
    };
    (
        ExecutionStatus::Failed,
        ExecutionFinish {
            error_message: Some(format!("Job body panicked: {payload}")),
            stack_trace: Some(format!("{summary}\npanic payload: {payload}")),
            exit_code: Some(1),
            ..Default::default()
        },
    )
}
