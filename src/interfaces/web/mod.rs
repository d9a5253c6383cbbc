pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::cron::CronService;
use crate::core::lifecycle::LifecycleComponent;

/// Admin HTTP API over a [`CronService`].
pub struct ApiServer {
    service: Arc<CronService>,
    log_tx: tokio::sync::broadcast::Sender<String>,
    api_host: String,
    api_port: u16,
    internal_token: Option<String>,
    stop: CancellationToken,
}

pub struct ApiServerConfig {
    pub service: Arc<CronService>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub internal_token: Option<String>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<CronService>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_port: u16,
    pub(crate) internal_token: Option<String>,
    /// Token-less access is only tolerated on a loopback bind.
    pub(crate) loopback_bind: bool,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            service: config.service,
            log_tx: config.log_tx,
            api_host: config.api_host,
            api_port: config.api_port,
            internal_token: config.internal_token,
            stop: CancellationToken::new(),
        }
    }

    fn state(&self) -> AppState {
        AppState {
            service: self.service.clone(),
            log_tx: self.log_tx.clone(),
            api_port: self.api_port,
            internal_token: self.internal_token.clone(),
            loopback_bind: is_loopback_host(&self.api_host),
        }
    }
}

pub(crate) fn is_loopback_host(host: &str) -> bool {
    let host = host.trim();
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

async fn health_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// --- Lifecycle ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server on {addr}"))?;
        let app = router::build_api_router(self.state());
        let stop = self.stop.clone();

        tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                tracing::error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.stop.cancel();
        Ok(())
    }
}
