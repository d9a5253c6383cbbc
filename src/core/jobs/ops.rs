//! Boundary to the bookkeeping application's maintenance operations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const INTERNAL_TOKEN_HEADER: &str = "x-tally-internal-token";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Result of one maintenance operation as reported by the host application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub items_processed: Option<u64>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
impl OperationReport {
    pub(crate) fn done(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait BookkeepingOps: Send + Sync {
    async fn create_backup(&self, correlation_id: &str) -> Result<OperationReport>;
    async fn process_imports(&self, correlation_id: &str) -> Result<OperationReport>;
    async fn categorize_transactions(
        &self,
        correlation_id: &str,
        batch_size: u32,
    ) -> Result<OperationReport>;
    async fn prune_sessions(&self, correlation_id: &str) -> Result<OperationReport>;
    async fn refresh_filters(&self, correlation_id: &str) -> Result<OperationReport>;
    async fn check_files(&self, correlation_id: &str) -> Result<OperationReport>;
}

/// Calls `POST {base}/internal/maintenance/{operation}` on the host app.
pub struct HttpBookkeepingOps {
    client: Client,
    base_url: String,
    internal_token: Option<String>,
}

impl HttpBookkeepingOps {
    pub fn new(base_url: &str, internal_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_token,
        })
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}/internal/maintenance/{}", self.base_url, operation)
    }

    async fn call(
        &self,
        operation: &str,
        correlation_id: &str,
        body: serde_json::Value,
    ) -> Result<OperationReport> {
        let mut req = self
            .client
            .post(self.endpoint(operation))
            .header(CORRELATION_HEADER, correlation_id)
            .json(&body);
        if let Some(token) = &self.internal_token {
            req = req.header(INTERNAL_TOKEN_HEADER, token);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Maintenance call '{}' failed", operation))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Maintenance call '{}' returned {}: {}", operation, status, body);
        }
        let report = resp
            .json::<OperationReport>()
            .await
            .with_context(|| format!("Invalid response from maintenance call '{}'", operation))?;
        Ok(report)
    }
}

#[async_trait]
impl BookkeepingOps for HttpBookkeepingOps {
    async fn create_backup(&self, correlation_id: &str) -> Result<OperationReport> {
        self.call("backup", correlation_id, serde_json::json!({}))
            .await
    }

    async fn process_imports(&self, correlation_id: &str) -> Result<OperationReport> {
        self.call("process-imports", correlation_id, serde_json::json!({}))
            .await
    }

    async fn categorize_transactions(
        &self,
        correlation_id: &str,
        batch_size: u32,
    ) -> Result<OperationReport> {
        self.call(
            "categorize-transactions",
            correlation_id,
            serde_json::json!({ "batchSize": batch_size }),
        )
        .await
    }

    async fn prune_sessions(&self, correlation_id: &str) -> Result<OperationReport> {
        self.call("prune-sessions", correlation_id, serde_json::json!({}))
            .await
    }

    async fn refresh_filters(&self, correlation_id: &str) -> Result<OperationReport> {
        self.call("refresh-filters", correlation_id, serde_json::json!({}))
            .await
    }

    async fn check_files(&self, correlation_id: &str) -> Result<OperationReport> {
        self.call("check-files", correlation_id, serde_json::json!({}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    async fn spawn_host(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn sends_token_correlation_and_parses_report() {
        let app = Router::new().route(
            "/internal/maintenance/categorize-transactions",
            post(
                |headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(headers[INTERNAL_TOKEN_HEADER], "secret");
                    assert_eq!(headers[CORRELATION_HEADER], "exec-1");
                    Json(serde_json::json!({
                        "success": true,
                        "message": "Categorized",
                        "itemsProcessed": body["batchSize"],
                    }))
                },
            ),
        );
        let base = spawn_host(app).await;
        let ops =
            HttpBookkeepingOps::new(&base, Some("secret".into()), Duration::from_secs(5)).unwrap();

        let report = ops.categorize_transactions("exec-1", 25).await.unwrap();
        assert!(report.success);
        assert_eq!(report.items_processed, Some(25));
        assert_eq!(report.message.as_deref(), Some("Categorized"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let app = Router::new().route(
            "/internal/maintenance/backup",
            post(|| async { (StatusCode::INSUFFICIENT_STORAGE, "disk full") }),
        );
        let base = spawn_host(app).await;
        let ops = HttpBookkeepingOps::new(&format!("{base}/"), None, Duration::from_secs(5)).unwrap();

        let err = ops.create_backup("exec-2").await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("507"));
        assert!(text.contains("disk full"));
    }
}
