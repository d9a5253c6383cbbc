use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::jobs::ops::BookkeepingOps;
use crate::core::store::CronStore;

/// Optional resource figures a job body can report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub items_processed: Option<u64>,
    pub execution_time_ms: Option<u64>,
    pub memory_usage_mb: Option<f64>,
}

/// Structured result of one job body invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<JobMetrics>,
}

impl JobOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metrics(mut self, metrics: JobMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Text persisted in the execution's `output` column.
    pub fn render_output(&self) -> Option<String> {
        let data = self
            .data
            .as_ref()
            .and_then(|data| serde_json::to_string(data).ok());
        match (self.message.as_deref(), data) {
            (Some(message), Some(data)) => Some(format!("{message}\n{data}")),
            (Some(message), None) => Some(message.to_string()),
            (None, data) => data,
        }
    }
}

/// Everything a job body may touch while it runs.
#[derive(Clone)]
pub struct JobContext {
    pub store: CronStore,
    pub ops: Arc<dyn BookkeepingOps>,
    /// Synthetic identity the body acts as.
    pub actor: String,
    /// Correlates log lines and downstream calls with the execution row.
    pub correlation_id: String,
    pub job_name: String,
    pub retry_count: u32,
    /// Fires when the attempt times out or the service stops.
    pub cancel: CancellationToken,
}

/// Reply for manual and API triggers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TriggerResponse {
    pub fn started(execution_id: String) -> Self {
        Self {
            success: true,
            execution_id,
            message: None,
        }
    }

    pub fn skipped(execution_id: String, reason: &str) -> Self {
        Self {
            success: true,
            execution_id,
            message: Some(reason.to_string()),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            execution_id: String::new(),
            message: Some(message.into()),
        }
    }
}
