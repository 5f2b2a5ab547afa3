//! Per-priority request policies.
//!
//! A `RequestConfig` is immutable once built and shared by every request that
//! uses it. `PolicyTable` resolves the policy for a priority level, which is how
//! requests reloaded from the offline store get their configuration back.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::priority::Priority;
use crate::error::SchedulerError;

/// Immutable per-request-type policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub priority: Priority,
    /// Route through a batch buffer when a strategy is registered.
    pub can_batch: bool,
    pub max_batch_size: usize,
    #[serde(with = "secs_f64")]
    pub max_batch_delay: Duration,
    /// Critical requests with this flag skip the queue and the rate limiter.
    pub bypass_rate_limit: bool,
    pub max_retries: u32,
    /// Base delay for exponential backoff (`retry_delay * 2^attempt`).
    #[serde(with = "secs_f64")]
    pub retry_delay: Duration,
    /// Per-attempt timeout. The sender's default applies when unset.
    #[serde(with = "opt_secs_f64")]
    pub timeout: Option<Duration>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self::for_priority(Priority::Normal)
    }
}

impl RequestConfig {
    /// Built-in policy for a priority level.
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Critical => Self {
                priority,
                can_batch: false,
                max_batch_size: 1,
                max_batch_delay: Duration::ZERO,
                bypass_rate_limit: true,
                max_retries: 5,
                retry_delay: Duration::from_millis(500),
                timeout: None,
            },
            Priority::High => Self {
                priority,
                can_batch: false,
                max_batch_size: 10,
                max_batch_delay: Duration::from_millis(500),
                bypass_rate_limit: false,
                max_retries: 3,
                retry_delay: Duration::from_secs(1),
                timeout: None,
            },
            Priority::Normal => Self {
                priority,
                can_batch: true,
                max_batch_size: 20,
                max_batch_delay: Duration::from_secs(2),
                bypass_rate_limit: false,
                max_retries: 3,
                retry_delay: Duration::from_secs(1),
                timeout: None,
            },
            Priority::Low => Self {
                priority,
                can_batch: true,
                max_batch_size: 50,
                max_batch_delay: Duration::from_secs(5),
                bypass_rate_limit: false,
                max_retries: 2,
                retry_delay: Duration::from_secs(2),
                timeout: None,
            },
            Priority::Batch => Self {
                priority,
                can_batch: true,
                max_batch_size: 100,
                max_batch_delay: Duration::from_secs(10),
                bypass_rate_limit: false,
                max_retries: 1,
                retry_delay: Duration::from_secs(5),
                timeout: None,
            },
        }
    }

    /// Policy for a critical request: Critical priority, bypass on, no batching.
    /// Retry settings are kept from `self`.
    pub fn as_critical(&self) -> Self {
        Self {
            priority: Priority::Critical,
            can_batch: false,
            bypass_rate_limit: true,
            ..self.clone()
        }
    }
}

/// Priority -> policy lookup.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<Priority, Arc<RequestConfig>>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let policies = Priority::ALL
            .iter()
            .map(|&p| (p, Arc::new(RequestConfig::for_priority(p))))
            .collect();
        Self { policies }
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: Vec<RequestConfig>,
}

impl PolicyTable {
    /// A table with no policies at all.
    pub fn empty() -> Self {
        Self { policies: HashMap::new() }
    }

    /// Parse `[[policy]]` entries from TOML. The first entry for a priority wins.
    pub fn from_toml_str(source: &str) -> Result<Self, SchedulerError> {
        let file: PolicyFile =
            toml::from_str(source).map_err(|e| SchedulerError::Policy(e.to_string()))?;
        let mut table = Self::empty();
        for config in file.policy {
            table
                .policies
                .entry(config.priority)
                .or_insert_with(|| Arc::new(config));
        }
        Ok(table)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, SchedulerError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Policy(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    pub fn insert(&mut self, config: RequestConfig) {
        self.policies.insert(config.priority, Arc::new(config));
    }

    pub fn get(&self, priority: Priority) -> Option<Arc<RequestConfig>> {
        self.policies.get(&priority).cloned()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        to_duration(f64::deserialize(d)?)
    }

    /// Negative, non-finite and out-of-range values are rejected.
    pub fn to_duration<E: serde::de::Error>(secs: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(secs)
            .map_err(|e| E::custom(format!("invalid duration {secs} seconds: {e}")))
    }
}

mod opt_secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::secs_f64::serialize(d, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?.map(super::secs_f64::to_duration).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_every_priority() {
        let table = PolicyTable::default();
        for p in Priority::ALL {
            assert_eq!(table.get(p).unwrap().priority, p);
        }
        assert!(table.get(Priority::Critical).unwrap().bypass_rate_limit);
    }

    #[test]
    fn parses_toml_policies() {
        let table = PolicyTable::from_toml_str(
            r#"
            [[policy]]
            priority = "low"
            can_batch = true
            max_batch_size = 25
            max_batch_delay = 1.5
            max_retries = 4
            retry_delay = 0.25

            [[policy]]
            priority = "low"
            max_retries = 9
            "#,
        )
        .unwrap();

        assert_eq!(table.len(), 1);
        let low = table.get(Priority::Low).unwrap();
        assert_eq!(low.max_batch_size, 25);
        assert_eq!(low.max_batch_delay, Duration::from_millis(1500));
        assert_eq!(low.max_retries, 4);
        assert_eq!(low.retry_delay, Duration::from_millis(250));
        assert!(table.get(Priority::High).is_none());
    }

    #[test]
    fn rejects_negative_durations() {
        let err = PolicyTable::from_toml_str(
            r#"
            [[policy]]
            priority = "high"
            retry_delay = -1.0
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_durations_too_large_to_represent() {
        for field in ["retry_delay", "max_batch_delay", "timeout"] {
            let source = format!("[[policy]]\npriority = \"normal\"\n{field} = 1e300\n");
            let err = PolicyTable::from_toml_str(&source).unwrap_err();
            assert!(matches!(err, SchedulerError::Policy(_)), "{field}: {err}");
        }
    }

    #[test]
    fn as_critical_keeps_retry_settings() {
        let base = RequestConfig {
            max_retries: 7,
            ..RequestConfig::for_priority(Priority::Low)
        };
        let critical = base.as_critical();
        assert_eq!(critical.priority, Priority::Critical);
        assert!(critical.bypass_rate_limit);
        assert!(!critical.can_batch);
        assert_eq!(critical.max_retries, 7);
    }
}
