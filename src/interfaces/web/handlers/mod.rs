pub mod executions;
pub mod jobs;
