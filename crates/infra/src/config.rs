//! Executor configuration.

use std::str::FromStr;

use tracing::warn;

/// Smallest and largest accepted progress flush interval.
pub const FLUSH_EVERY_RANGE: (usize, usize) = (1, 20);

/// Tuning knobs for task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Worker threads in the pool.
    pub workers: usize,
    /// Thread name prefix for workers and log fields.
    pub worker_name: String,
    flush_every: usize,
    /// Rows read per store page during selection.
    pub page_size: usize,
    /// Per-candidate failures kept in the outcome sample.
    pub max_failure_samples: usize,
    /// Upper bound on recorded error message length, in characters.
    pub max_message_len: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            worker_name: "coursetasks-worker".to_string(),
            flush_every: 10,
            page_size: 500,
            max_failure_samples: 50,
            max_message_len: 1000,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by `COURSETASKS_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: usize| parse_or(key, lookup(key), default);

        Self {
            workers: read("COURSETASKS_WORKERS", defaults.workers).max(1),
            worker_name: lookup("COURSETASKS_WORKER_NAME").unwrap_or(defaults.worker_name),
            flush_every: clamp_flush(read("COURSETASKS_FLUSH_EVERY", defaults.flush_every)),
            page_size: read("COURSETASKS_PAGE_SIZE", defaults.page_size).max(1),
            max_failure_samples: read("COURSETASKS_MAX_FAILURE_SAMPLES", defaults.max_failure_samples),
            max_message_len: read("COURSETASKS_MAX_MESSAGE_LEN", defaults.max_message_len),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Flush progress every `n` outcomes (clamped to 1..=20).
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = clamp_flush(n);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_failure_samples(mut self, max: usize) -> Self {
        self.max_failure_samples = max;
        self
    }

    pub fn with_max_message_len(mut self, max: usize) -> Self {
        self.max_message_len = max;
        self
    }

    pub fn flush_every(&self) -> usize {
        self.flush_every
    }
}

fn clamp_flush(n: usize) -> usize {
    n.clamp(FLUSH_EVERY_RANGE.0, FLUSH_EVERY_RANGE.1)
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "invalid config value; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.flush_every(), 10);
        assert_eq!(config.max_failure_samples, 50);
        assert_eq!(config.max_message_len, 1000);
        assert_eq!(ExecutorConfig::from_lookup(|_| None), config);
    }

    #[test]
    fn flush_interval_is_clamped() {
        assert_eq!(ExecutorConfig::default().with_flush_every(0).flush_every(), 1);
        assert_eq!(ExecutorConfig::default().with_flush_every(500).flush_every(), 20);
        assert_eq!(ExecutorConfig::default().with_flush_every(7).flush_every(), 7);
    }

    #[test]
    fn env_overrides_and_bad_values() {
        let config = ExecutorConfig::from_lookup(lookup(&[
            ("COURSETASKS_WORKERS", "8"),
            ("COURSETASKS_FLUSH_EVERY", "100"),
            ("COURSETASKS_PAGE_SIZE", "not-a-number"),
            ("COURSETASKS_WORKER_NAME", "grader"),
        ]));
        assert_eq!(config.workers, 8);
        assert_eq!(config.flush_every(), 20);
        assert_eq!(config.page_size, 500);
        assert_eq!(config.worker_name, "grader");
    }
}
