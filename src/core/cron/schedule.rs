use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Fills `${NAME}` tokens in schedule templates.
///
/// Lookup order: process environment, the `[schedules]` config table, then
/// the definition's built-in default.
#[derive(Debug, Clone, Default)]
pub struct ScheduleResolver {
    overrides: HashMap<String, String>,
    read_env: bool,
}

impl ScheduleResolver {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self {
            overrides,
            read_env: true,
        }
    }

    /// Resolver that ignores the process environment.
    #[cfg(test)]
    pub(crate) fn isolated(overrides: HashMap<String, String>) -> Self {
        Self {
            overrides,
            read_env: false,
        }
    }

    fn lookup(&self, name: &str, defaults: &HashMap<String, String>) -> Option<String> {
        if self.read_env
            && let Ok(value) = std::env::var(name)
            && !value.trim().is_empty()
        {
            return Some(value);
        }
        self.overrides
            .get(name)
            .or_else(|| defaults.get(name))
            .cloned()
    }

    pub fn resolve(&self, template: &str, defaults: &HashMap<String, String>) -> Result<String> {
        let mut missing = Vec::new();
        let resolved = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match self.lookup(name, defaults) {
                Some(value) => value,
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        });
        if !missing.is_empty() {
            anyhow::bail!(
                "Unresolved schedule placeholder(s) {} in '{}'",
                missing.join(", "),
                template
            );
        }
        let resolved = resolved.trim().to_string();
        normalize_expression(&resolved)?;
        Ok(resolved)
    }
}

/// Convert crontab syntax to the seconds-first form the scheduler expects.
pub fn normalize_expression(expression: &str) -> Result<String> {
    let expression = expression.trim();
    let field_count = expression.split_whitespace().count();

    match field_count {
        // minute hour day month weekday
        5 => Ok(format!("0 {expression}")),
        6 | 7 => Ok(expression.to_string()),
        _ => anyhow::bail!(
            "Invalid cron expression: {expression} (expected 5, 6, or 7 fields, got {field_count})"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_fills_placeholder() {
        let resolver = ScheduleResolver::isolated(HashMap::new());
        let resolved = resolver
            .resolve("${BACKUP_SCHEDULE}", &defaults(&[("BACKUP_SCHEDULE", "0 2 * * *")]))
            .unwrap();
        assert_eq!(resolved, "0 2 * * *");
    }

    #[test]
    fn config_override_beats_default() {
        let resolver =
            ScheduleResolver::isolated(defaults(&[("BACKUP_SCHEDULE", "30 4 * * *")]));
        let resolved = resolver
            .resolve("${BACKUP_SCHEDULE}", &defaults(&[("BACKUP_SCHEDULE", "0 2 * * *")]))
            .unwrap();
        assert_eq!(resolved, "30 4 * * *");
    }

    #[test]
    fn partial_templates_substitute_in_place() {
        let resolver = ScheduleResolver::isolated(HashMap::new());
        let resolved = resolver
            .resolve("0 ${HOUR} * * *", &defaults(&[("HOUR", "3")]))
            .unwrap();
        assert_eq!(resolved, "0 3 * * *");
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let resolver = ScheduleResolver::isolated(HashMap::new());
        let err = resolver
            .resolve("${NOWHERE_SCHEDULE}", &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("NOWHERE_SCHEDULE"));
    }

    #[test]
    fn resolved_value_must_look_like_cron() {
        let resolver = ScheduleResolver::isolated(defaults(&[("S", "every day")]));
        assert!(resolver.resolve("${S}", &HashMap::new()).is_err());
    }

    #[test]
    fn normalize_prefixes_seconds_for_crontab_syntax() {
        assert_eq!(normalize_expression("*/15 * * * *").unwrap(), "0 */15 * * * *");
        assert_eq!(normalize_expression("0 0 2 * * *").unwrap(), "0 0 2 * * *");
        assert!(normalize_expression("* *").is_err());
    }
}
