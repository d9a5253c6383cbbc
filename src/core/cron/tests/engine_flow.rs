use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use super::{executions_for, fast_settings, persist, test_engine, wait_for_terminal};
use crate::core::cron::{
    Dispatch, EngineSettings, JobContext, JobDefinition, JobMetrics, JobOutput,
    RESTORE_SKIP_REASON, TriggerError,
};
use crate::core::store::{
    CronStore, ExecutionStatus, RESTORE_PROGRESS_KEY, TriggerSource, parse_timestamp,
};

#[tokio::test]
async fn disk_full_backup_produces_three_failed_records() {
    let store = CronStore::open_in_memory().await.unwrap();
    let def = Arc::new(
        JobDefinition::new("backup-database", "0 2 * * *", |_ctx: JobContext| async {
            Err::<JobOutput, _>(anyhow::anyhow!("disk full"))
        })
        .timeout_ms(300_000)
        .max_retries(2),
    );
    let job = persist(&store, &def).await;
    let engine = test_engine(&store, fast_settings());

    engine
        .trigger(def.clone(), job.clone(), TriggerSource::Scheduler, None, 0)
        .await
        .unwrap();
    engine.drain().await;

    let rows = executions_for(&store, &job.id).await;
    assert_eq!(rows.len(), 3);
    for (expected, row) in rows.iter().enumerate() {
        assert_eq!(row.retry_count, expected as u32);
        assert_eq!(row.status, ExecutionStatus::Failed);
        assert_eq!(row.triggered_by, TriggerSource::Scheduler);
        assert!(row.error_message.as_deref().unwrap().contains("disk full"));
        assert_eq!(row.exit_code, Some(1));
    }
    assert!(!engine.is_running(&job.id));
}

#[tokio::test]
async fn retry_stops_after_first_success() {
    let store = CronStore::open_in_memory().await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let def = Arc::new(
        JobDefinition::new("process-imports", "*/15 * * * *", move |_ctx: JobContext| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    anyhow::bail!("import service unavailable");
                }
                anyhow::Ok(JobOutput::ok("Imported 4 files"))
            }
        })
        .max_retries(5),
    );
    let job = persist(&store, &def).await;
    let engine = test_engine(&store, fast_settings());

    engine
        .trigger(def, job.clone(), TriggerSource::Api, Some("u-9".to_string()), 0)
        .await
        .unwrap();
    engine.drain().await;

    let rows = executions_for(&store, &job.id).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);
    assert_eq!(rows[1].status, ExecutionStatus::Completed);
    assert_eq!(rows[1].retry_count, 1);
    assert_eq!(rows[1].triggered_by, TriggerSource::Api);
    assert_eq!(rows[1].triggered_by_user_id.as_deref(), Some("u-9"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_trigger_while_running_is_rejected() {
    let store = CronStore::open_in_memory().await.unwrap();
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let def = Arc::new(JobDefinition::new(
        "refresh-filters",
        "*/30 * * * *",
        move |_ctx: JobContext| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                anyhow::Ok(JobOutput::ok("Refreshed"))
            }
        },
    ));
    let job = persist(&store, &def).await;
    let engine = test_engine(&store, fast_settings());

    let first = engine
        .trigger(def.clone(), job.clone(), TriggerSource::Manual, None, 0)
        .await
        .unwrap();
    assert!(matches!(first, Dispatch::Started(_)));
    assert_eq!(
        engine.running_execution(&job.id).as_deref(),
        Some(first.execution_id())
    );

    let second = engine
        .trigger(def.clone(), job.clone(), TriggerSource::Scheduler, None, 0)
        .await;
    assert!(matches!(second, Err(TriggerError::AlreadyRunning)));
    assert_eq!(executions_for(&store, &job.id).await.len(), 1);

    release.notify_one();
    engine.drain().await;
    let rows = executions_for(&store, &job.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ExecutionStatus::Completed);
    assert!(!engine.is_running(&job.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_start_exactly_one_execution() {
    let store = CronStore::open_in_memory().await.unwrap();
    let def = Arc::new(JobDefinition::new(
        "prune-sessions",
        "0 * * * *",
        |_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            anyhow::Ok(JobOutput::ok("Pruned"))
        },
    ));
    let job = persist(&store, &def).await;
    let engine = test_engine(&store, fast_settings());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let def = def.clone();
        let job = job.clone();
        handles.push(tokio::spawn(async move {
            engine
                .trigger(def, job, TriggerSource::Scheduler, None, 0)
                .await
        }));
    }
    let mut started = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    engine.drain().await;
    assert_eq!(executions_for(&store, &job.id).await.len(), 1);
}

#[tokio::test]
async fn restore_in_progress_skips_without_running_body() {
    let store = CronStore::open_in_memory().await.unwrap();
    store
        .set_setting(RESTORE_PROGRESS_KEY, r#"{"phase":"extracting","percent":12}"#)
        .await
        .unwrap();
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let def = Arc::new(
        JobDefinition::new("categorize-transactions", "0 * * * *", move |_ctx: JobContext| {
            flag.store(true, Ordering::SeqCst);
            async { anyhow::Ok(JobOutput::ok("Categorized")) }
        })
        .max_retries(3),
    );
    let job = persist(&store, &def).await;
    let engine = test_engine(&store, fast_settings());

    let dispatch = engine
        .trigger(def.clone(), job.clone(), TriggerSource::Scheduler, None, 0)
        .await
        .unwrap();
    let Dispatch::Skipped(execution_id) = dispatch else {
        panic!("expected a skipped dispatch");
    };
    engine.drain().await;

    assert!(!invoked.load(Ordering::SeqCst));
    let rows = executions_for(&store, &job.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, execution_id);
    assert_eq!(rows[0].status, ExecutionStatus::Skipped);
    assert_eq!(rows[0].output.as_deref(), Some(RESTORE_SKIP_REASON));
    assert!(!engine.is_running(&job.id));

    store
        .set_setting(RESTORE_PROGRESS_KEY, r#"{"phase":"completed"}"#)
        .await
        .unwrap();
    let dispatch = engine
        .trigger(def, job.clone(), TriggerSource::Scheduler, None, 0)
        .await
        .unwrap();
    assert!(matches!(dispatch, Dispatch::Started(_)));
    engine.drain().await;
    assert!(invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn hung_body_times_out_without_blocking_other_jobs() {
    let store = CronStore::open_in_memory().await.unwrap();
    let slow = Arc::new(
        JobDefinition::new("check-import-files", "0 */6 * * *", |_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::Ok(JobOutput::ok("unreachable"))
        })
        .timeout_ms(300),
    );
    let fast = Arc::new(JobDefinition::new(
        "prune-sessions",
        "0 * * * *",
        |_ctx: JobContext| async { anyhow::Ok(JobOutput::ok("Pruned 2 sessions")) },
    ));
    let slow_job = persist(&store, &slow).await;
    let fast_job = persist(&store, &fast).await;
    let engine = test_engine(&store, fast_settings());

    let slow_dispatch = engine
        .trigger(slow, slow_job.clone(), TriggerSource::Scheduler, None, 0)
        .await
        .unwrap();
    let fast_dispatch = engine
        .trigger(fast, fast_job.clone(), TriggerSource::Scheduler, None, 0)
        .await
        .unwrap();

    let fast_rec = wait_for_terminal(&store, fast_dispatch.execution_id()).await;
    assert_eq!(fast_rec.status, ExecutionStatus::Completed);

    let slow_rec = wait_for_terminal(&store, slow_dispatch.execution_id()).await;
    assert_eq!(slow_rec.status, ExecutionStatus::Timeout);
    assert!(slow_rec.exit_code.is_none());
    assert!(slow_rec.error_message.as_deref().unwrap().contains("300ms"));
    let elapsed = parse_timestamp(slow_rec.completed_at.as_deref().unwrap()).unwrap()
        - parse_timestamp(&slow_rec.started_at).unwrap();
    assert!(elapsed.num_milliseconds() >= 300);
    assert!(elapsed.num_milliseconds() < 5_000);
    assert!(fast_rec.completed_at < slow_rec.completed_at);
    engine.drain().await;
}

#[tokio::test]
async fn panicking_body_is_recorded_as_failed() {
    let store = CronStore::open_in_memory().await.unwrap();
    let def = Arc::new(JobDefinition::new(
        "refresh-filters",
        "*/30 * * * *",
        |_ctx: JobContext| async {
            if true {
                panic!("filter cache corrupted");
            }
            anyhow::Ok(JobOutput::ok("unreachable"))
        },
    ));
    let job = persist(&store, &def).await;
    let engine = test_engine(&store, fast_settings());

    engine
        .trigger(def, job.clone(), TriggerSource::Manual, None, 0)
        .await
        .unwrap();
    engine.drain().await;

    let rows = executions_for(&store, &job.id).await;
    assert_eq!(rows[0].status, ExecutionStatus::Failed);
    assert_eq!(
        rows[0].error_message.as_deref(),
        Some("Job body panicked: filter cache corrupted")
    );
    let trace = rows[0].stack_trace.as_deref().unwrap();
    assert!(trace.contains("panic payload: filter cache corrupted"), "{trace}");
    assert_eq!(rows[0].exit_code, Some(1));
    assert!(!engine.is_running(&job.id));
}

#[tokio::test]
async fn successful_output_and_metrics_are_persisted() {
    let store = CronStore::open_in_memory().await.unwrap();
    let def = Arc::new(JobDefinition::new(
        "backup-database",
        "0 2 * * *",
        |ctx: JobContext| async move {
            assert_eq!(ctx.actor, "system");
            assert_eq!(ctx.job_name, "backup-database");
            anyhow::Ok(JobOutput::ok("Backup created")
                .with_data(serde_json::json!({ "file": "tally-2026.db" }))
                .with_metrics(JobMetrics {
                    memory_usage_mb: Some(42.5),
                    ..Default::default()
                }))
        },
    ));
    let job = persist(&store, &def).await;
    let engine = test_engine(&store, fast_settings());

    let dispatch = engine
        .trigger(def, job.clone(), TriggerSource::Manual, None, 0)
        .await
        .unwrap();
    let rec = wait_for_terminal(&store, dispatch.execution_id()).await;
    assert_eq!(rec.status, ExecutionStatus::Completed);
    assert_eq!(rec.exit_code, Some(0));
    assert_eq!(rec.memory_usage_mb, Some(42.5));
    let output = rec.output.unwrap();
    assert!(output.starts_with("Backup created"));
    assert!(output.contains("tally-2026.db"));
    assert!(rec.error_message.is_none());
}

#[tokio::test]
async fn shutdown_drops_pending_retries() {
    let store = CronStore::open_in_memory().await.unwrap();
    let def = Arc::new(
        JobDefinition::new("process-imports", "*/15 * * * *", |_ctx: JobContext| async {
            Err::<JobOutput, _>(anyhow::anyhow!("upstream down"))
        })
        .max_retries(3),
    );
    let job = persist(&store, &def).await;
    let engine = test_engine(
        &store,
        EngineSettings {
            retry_base_delay: Duration::from_secs(60),
            retry_max_delay: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        },
    );

    let dispatch = engine
        .trigger(def.clone(), job.clone(), TriggerSource::Scheduler, None, 0)
        .await
        .unwrap();
    wait_for_terminal(&store, dispatch.execution_id()).await;

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
        .await
        .unwrap();
    assert_eq!(executions_for(&store, &job.id).await.len(), 1);

    let after = engine
        .trigger(def, job, TriggerSource::Manual, None, 0)
        .await;
    assert!(matches!(after, Err(TriggerError::ShuttingDown)));
}

#[tokio::test]
async fn shutdown_cancels_bodies_past_the_grace_period() {
    let store = CronStore::open_in_memory().await.unwrap();
    let def = Arc::new(
        JobDefinition::new("check-import-files", "0 */6 * * *", |_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok(JobOutput::ok("unreachable"))
        })
        .timeout_ms(120_000)
        .max_retries(2),
    );
    let job = persist(&store, &def).await;
    let engine = test_engine(
        &store,
        EngineSettings {
            shutdown_grace: Duration::from_millis(50),
            ..fast_settings()
        },
    );

    let dispatch = engine
        .trigger(def, job.clone(), TriggerSource::Scheduler, None, 0)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
        .await
        .unwrap();

    let rec = store
        .get_execution(dispatch.execution_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, ExecutionStatus::Cancelled);
    assert_eq!(executions_for(&store, &job.id).await.len(), 1);
}
