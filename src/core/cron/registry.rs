use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::types::{JobContext, JobOutput};

/// The work a job performs when it fires.
#[async_trait::async_trait]
pub trait JobBody: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<JobOutput>;
}

#[async_trait::async_trait]
impl<F, Fut> JobBody for F
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobOutput>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> Result<JobOutput> {
        (self)(ctx).await
    }
}

/// Code-level description of a job. `name` is the stable key that ties it
/// to its persisted record across deploys.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub description: String,
    /// Cron expression, possibly containing `${PLACEHOLDER}` tokens.
    pub schedule: String,
    /// Built-in values for placeholders nothing else provides.
    pub defaults: HashMap<String, String>,
    pub is_enabled: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub body: Arc<dyn JobBody>,
}

impl JobDefinition {
    pub fn new(name: &str, schedule: &str, body: impl JobBody + 'static) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            schedule: schedule.to_string(),
            defaults: HashMap::new(),
            is_enabled: true,
            timeout_ms: 60_000,
            max_retries: 0,
            body: Arc::new(body),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn default_value(mut self, placeholder: &str, value: &str) -> Self {
        self.defaults
            .insert(placeholder.to_string(), value.to_string());
        self
    }

    #[cfg(test)]
    pub(crate) fn enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = is_enabled;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Name-keyed set of job definitions, in registration order.
#[derive(Default)]
pub struct JobRegistry {
    definitions: Vec<Arc<JobDefinition>>,
    by_name: HashMap<String, usize>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: JobDefinition) -> Result<()> {
        if self.by_name.contains_key(&definition.name) {
            anyhow::bail!("Job '{}' is already registered", definition.name);
        }
        self.by_name
            .insert(definition.name.clone(), self.definitions.len());
        self.definitions.push(Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.by_name
            .get(name)
            .map(|idx| self.definitions[*idx].clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.definitions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_ctx: JobContext) -> Result<JobOutput> {
        Ok(JobOutput::ok("noop"))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = JobRegistry::new();
        registry
            .register(JobDefinition::new("prune-sessions", "0 * * * *", noop))
            .unwrap();
        let err = registry
            .register(JobDefinition::new("prune-sessions", "*/5 * * * *", noop))
            .unwrap_err();
        assert!(err.to_string().contains("prune-sessions"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_preserves_registration_order() {
        let mut registry = JobRegistry::new();
        for name in ["b-job", "a-job", "c-job"] {
            registry
                .register(JobDefinition::new(name, "0 * * * *", noop))
                .unwrap();
        }
        assert_eq!(registry.names(), vec!["b-job", "a-job", "c-job"]);
        assert!(registry.get("a-job").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn builder_sets_runtime_limits() {
        let def = JobDefinition::new("backup-database", "${BACKUP_SCHEDULE}", noop)
            .description("Nightly backup")
            .default_value("BACKUP_SCHEDULE", "0 2 * * *")
            .timeout_ms(300_000)
            .max_retries(2)
            .enabled(false);
        assert_eq!(def.timeout_ms, 300_000);
        assert_eq!(def.max_retries, 2);
        assert!(!def.is_enabled);
        assert_eq!(def.defaults["BACKUP_SCHEDULE"], "0 2 * * *");
    }
}
