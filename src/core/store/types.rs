use serde::{Deserialize, Serialize};

/// Terminal and non-terminal states of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 6] = [
        ExecutionStatus::Running,
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Timeout,
        ExecutionStatus::Cancelled,
        ExecutionStatus::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Skipped => "skipped",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    pub fn is_terminal(self) -> bool {
        self != ExecutionStatus::Running
    }

    /// Only failures and timeouts earn another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ExecutionStatus::Failed | ExecutionStatus::Timeout)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduler,
    Manual,
    Api,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Scheduler => "scheduler",
            TriggerSource::Manual => "manual",
            TriggerSource::Api => "api",
        }
    }

    pub fn from_source(value: &str) -> Option<Self> {
        match value {
            "scheduler" => Some(TriggerSource::Scheduler),
            "manual" => Some(TriggerSource::Manual),
            "api" => Some(TriggerSource::Api),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted, operator-adjustable mirror of a job definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub is_enabled: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub created_at: String,
    pub updated_at: String,
    pub created_by: String,
    pub last_modified_by: String,
}

/// Code-owned fields written by reconciliation.
#[derive(Debug, Clone)]
pub struct CronJobSpec {
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub is_enabled: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub job_id: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub status: ExecutionStatus,
    pub triggered_by: TriggerSource,
    pub triggered_by_user_id: Option<String>,
    pub retry_count: u32,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub exit_code: Option<i32>,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
}

/// Fields written when a running attempt reaches a terminal status.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFinish {
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub exit_code: Option<i32>,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFilter {
    pub job_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub triggered_by: Option<TriggerSource>,
    pub triggered_by_user_id: Option<String>,
    /// Inclusive lower bound on `started_at` (RFC 3339).
    pub started_after: Option<String>,
    /// Inclusive upper bound on `started_at` (RFC 3339).
    pub started_before: Option<String>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPage {
    pub executions: Vec<ExecutionRecord>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBreakdown {
    pub total: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeout: u64,
    pub cancelled: u64,
    pub skipped: u64,
}

impl StatusBreakdown {
    pub(crate) fn add(&mut self, status: ExecutionStatus, count: u64) {
        self.total += count;
        match status {
            ExecutionStatus::Running => self.running += count,
            ExecutionStatus::Completed => self.completed += count,
            ExecutionStatus::Failed => self.failed += count,
            ExecutionStatus::Timeout => self.timeout += count,
            ExecutionStatus::Cancelled => self.cancelled += count,
            ExecutionStatus::Skipped => self.skipped += count,
        }
    }

    /// Percentage of finished attempts that completed. Running and skipped
    /// attempts are not counted as finished.
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed + self.timeout + self.cancelled;
        if finished == 0 {
            return 0.0;
        }
        let rate = self.completed as f64 * 100.0 / finished as f64;
        (rate * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOverview {
    #[serde(flatten)]
    pub job: CronJobRecord,
    pub latest_execution: Option<ExecutionRecord>,
    pub success_rate: f64,
    pub total_executions: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: CronJobRecord,
    pub recent_executions: Vec<ExecutionRecord>,
    pub breakdown: StatusBreakdown,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub days: u32,
    pub since: String,
    pub breakdown: StatusBreakdown,
    pub success_rate: f64,
    pub average_duration_ms: Option<f64>,
}
