//! Worker configuration, read from `REGRADE_*` environment variables.

use crate::ErrorKind;
use std::fmt;

pub const DEFAULT_QUEUE_NAME: &str = "gradebook_column_recalculate";

#[derive(Clone, PartialEq)]
pub struct WorkerConfig {
    pub queue_name: String,
    /// Messages read per poll.
    pub batch_size: usize,
    pub visibility_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Rows per page for every bulk store read.
    pub page_size: usize,
    pub http_port: u16,
    /// A message read more often than this is archived without being processed.
    pub max_deliveries: u32,
    /// Value the `x-edge-function-secret` header must carry. Without it the trigger rejects
    /// every request.
    pub trigger_secret: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            batch_size: 100,
            visibility_timeout_secs: 60,
            poll_interval_ms: 1000,
            page_size: 1000,
            http_port: 8080,
            max_deliveries: 10,
            trigger_secret: None,
        }
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("queue_name", &self.queue_name)
            .field("batch_size", &self.batch_size)
            .field("visibility_timeout_secs", &self.visibility_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("page_size", &self.page_size)
            .field("http_port", &self.http_port)
            .field("max_deliveries", &self.max_deliveries)
            .field(
                "trigger_secret",
                &self.trigger_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl WorkerConfig {
    /// Starts from the defaults and applies every non-empty `REGRADE_*` variable.
    pub fn from_env() -> Result<Self, ErrorKind> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ErrorKind> {
        let env = |name: &str| {
            lookup(name).and_then(|v| {
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        };

        let mut config = WorkerConfig::default();

        if let Some(name) = env("REGRADE_QUEUE_NAME") {
            config.queue_name = name;
        }
        if let Some(size) = parse::<usize>("REGRADE_BATCH_SIZE", env("REGRADE_BATCH_SIZE"))? {
            config.batch_size = positive("REGRADE_BATCH_SIZE", size)?;
        }
        if let Some(secs) = parse(
            "REGRADE_VISIBILITY_TIMEOUT_SECS",
            env("REGRADE_VISIBILITY_TIMEOUT_SECS"),
        )? {
            config.visibility_timeout_secs = secs;
        }
        if let Some(ms) = parse("REGRADE_POLL_INTERVAL_MS", env("REGRADE_POLL_INTERVAL_MS"))? {
            config.poll_interval_ms = ms;
        }
        if let Some(size) = parse::<usize>("REGRADE_PAGE_SIZE", env("REGRADE_PAGE_SIZE"))? {
            config.page_size = positive("REGRADE_PAGE_SIZE", size)?;
        }
        if let Some(port) = parse("REGRADE_HTTP_PORT", env("REGRADE_HTTP_PORT"))? {
            config.http_port = port;
        }
        if let Some(count) =
            parse::<u32>("REGRADE_MAX_DELIVERIES", env("REGRADE_MAX_DELIVERIES"))?
        {
            if count == 0 {
                return Err(ErrorKind::Config(
                    "REGRADE_MAX_DELIVERIES must be greater than 0".to_string(),
                ));
            }
            config.max_deliveries = count;
        }
        config.trigger_secret = env("REGRADE_TRIGGER_SECRET");

        Ok(config)
    }
}

fn parse<T>(name: &str, value: Option<String>) -> Result<Option<T>, ErrorKind>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match value {
        None => Ok(None),
        Some(v) => v.parse::<T>().map(Some).map_err(|e| {
            ErrorKind::Config(format!(
                "{} must be a {}: {}",
                name,
                std::any::type_name::<T>(),
                e
            ))
        }),
    }
}

fn positive(name: &str, value: usize) -> Result<usize, ErrorKind> {
    if value == 0 {
        Err(ErrorKind::Config(format!("{} must be greater than 0", name)))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<WorkerConfig, ErrorKind> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_without_variables() {
        assert_eq!(from_vars(&[]), Ok(WorkerConfig::default()));
    }

    #[test]
    fn variables_override_defaults() {
        let config = from_vars(&[
            ("REGRADE_QUEUE_NAME", "recalc"),
            ("REGRADE_BATCH_SIZE", " 25 "),
            ("REGRADE_PAGE_SIZE", ""),
            ("REGRADE_HTTP_PORT", "9000"),
            ("REGRADE_MAX_DELIVERIES", "3"),
            ("REGRADE_TRIGGER_SECRET", "s3cret"),
        ])
        .unwrap();

        assert_eq!(config.queue_name, "recalc");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.max_deliveries, 3);
        assert_eq!(config.trigger_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            from_vars(&[("REGRADE_HTTP_PORT", "eighty")]),
            Err(ErrorKind::Config(_))
        ));
        assert!(matches!(
            from_vars(&[("REGRADE_BATCH_SIZE", "0")]),
            Err(ErrorKind::Config(_))
        ));
        assert!(matches!(
            from_vars(&[("REGRADE_MAX_DELIVERIES", "0")]),
            Err(ErrorKind::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_the_secret() {
        let config = WorkerConfig {
            trigger_secret: Some("s3cret".to_string()),
            ..WorkerConfig::default()
        };

        let printed = format!("{:?}", config);
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains("s3cret"));
    }
}
