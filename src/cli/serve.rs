use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{parse_api_server_flags, parse_string_flag};
use crate::core::config::{self, AppConfig};
use crate::core::cron::{CronComponent, CronService, ScheduleResolver};
use crate::core::jobs::{self, ops::HttpBookkeepingOps};
use crate::core::lifecycle::LifecycleManager;
use crate::core::store::CronStore;
use crate::core::terminal::GuideSection;
use crate::interfaces::web::{ApiServer, ApiServerConfig};

/// Boot the scheduler and the admin API, then run until Ctrl+C.
pub async fn run_serve(args: &[String]) -> Result<()> {
    let data_dir = parse_string_flag(args, "--data-dir")
        .map(PathBuf::from)
        .unwrap_or_else(config::data_dir);
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let mut config = AppConfig::load(&data_dir).await?;
    (config.server.host, config.server.port) =
        parse_api_server_flags(args, 2, config.server.host.clone(), config.server.port);
    let quiet = args.iter().any(|a| a == "--quiet");

    let log_tx = crate::logging::init_logging(&config.log_level, quiet);

    if config.internal_token().is_none() && !config.is_loopback_bind() {
        warn!(
            "No internal token configured; the admin API on {} will refuse every request",
            config.bind_addr()
        );
    }

    let store = CronStore::open(config.database_path(), config.database.auto_migrate).await?;
    let registry = jobs::builtin_registry(&config.catalog_settings())?;
    if registry.is_empty() {
        warn!("No cron jobs registered");
    } else {
        info!("Registered cron jobs: {}", registry.names().join(", "));
    }
    let ops = HttpBookkeepingOps::new(
        &config.operations.app_base_url,
        config.internal_token(),
        config.request_timeout(),
    )?;
    let service = Arc::new(
        CronService::new(
            store,
            registry,
            Arc::new(ops),
            config.engine_settings(),
            ScheduleResolver::new(config.schedules.clone()),
        )
        .await?,
    );

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(CronComponent::new(service.clone()))));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        service: service.clone(),
        log_tx,
        api_host: config.server.host.clone(),
        api_port: config.server.port,
        internal_token: config.internal_token(),
    }))));
    lifecycle.start().await?;

    if !quiet {
        GuideSection::new("tally-cron")
            .status("Database", &config.database_path().display().to_string())
            .status(
                "Admin API",
                &format!("{}", style(config.api_url()).underlined().cyan()),
            )
            .status("Jobs", &service.registry().len().to_string())
            .blank()
            .status(
                "Press Ctrl+C to stop.",
                &format!("{}", style("Ctrl+C").bold().yellow()),
            )
            .print();
        println!();
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await?;
    Ok(())
}
