//! Job scheduling and execution.
//!
//! Definitions live in a [`JobRegistry`]; reconciliation mirrors them into
//! the store, [`CronService`] wires enabled records to the scheduler, and
//! every fire or manual trigger goes through the execution engine.

mod engine;
pub mod reconcile;
pub mod registry;
pub mod schedule;
mod service;
pub mod types;

pub use engine::EngineSettings;
pub use registry::{JobBody, JobDefinition, JobRegistry};
pub use schedule::ScheduleResolver;
pub use service::{CronComponent, CronService};
pub use types::{JobContext, JobMetrics, JobOutput};

#[cfg(test)]
pub(crate) use engine::{Dispatch, ExecutionEngine, RESTORE_SKIP_REASON, TriggerError};
#[cfg(test)]
pub(crate) use reconcile::reconcile_jobs;
#[cfg(test)]
pub(crate) use service::INTERRUPTED_REASON;

#[cfg(test)]
pub(crate) mod tests;
