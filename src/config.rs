//! Scheduler configuration loading from environment variables.
//!
//! All values come from `REQFLOW_*` environment variables with sensible
//! defaults. Invalid values fall back to defaults without failing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `REQFLOW_MAX_PER_SECOND` | 10 | Sends allowed per 1s window |
//! | `REQFLOW_MAX_PER_MINUTE` | 300 | Sends allowed per 60s window |
//! | `REQFLOW_RATE_LIMIT_COOLDOWN` | 60 | Cooldown after a 429 (secs, at most 86400) |
//! | `REQFLOW_MAX_QUEUE_SIZE` | 1000 | Priority queue capacity |
//! | `REQFLOW_PROCESS_INTERVAL_MS` | 100 | Queue-drain tick (ms) |
//! | `REQFLOW_MAX_CONCURRENT` | 5 | Max concurrent wire calls |
//! | `REQFLOW_REQUEST_TIMEOUT` | 30 | Default per-attempt timeout (secs) |
//! | `REQFLOW_BASE_URL` | "" | Prefix for relative endpoints |
//! | `REQFLOW_OFFLINE_QUEUE` | true | Mirror requests while offline |
//! | `REQFLOW_MAX_OFFLINE_QUEUE` | 500 | Offline store capacity |
//! | `REQFLOW_OFFLINE_KEY` | offline_queue | Offline store persistence key |
//! | `REQFLOW_OFFLINE_DIR` | .reqflow | Directory for file persistence |
//! | `REQFLOW_DEDUP` | true | Attach duplicates to pending requests |
//! | `REQFLOW_DEDUP_CACHE_SIZE` | 1000 | Tracked fingerprints |
//! | `REQFLOW_PROCESSED_HISTORY` | 10000 | Completed ids remembered |
//! | `REQFLOW_BATCH_KEY` | endpoint_priority | `endpoint` or `endpoint_priority` |
//! | `REQFLOW_HEALTH_URL` | unset | Health probe URL (enables probing) |
//! | `REQFLOW_NETWORK_CHECK_INTERVAL` | 5 | Probe period (secs) |
//! | `REQFLOW_SHUTDOWN_TIMEOUT` | 30 | Drain timeout on shutdown (secs) |
//! | `REQFLOW_POLICY_FILE` | unset | TOML file with `[[policy]]` entries |
//! | `REQFLOW_LOG_FORMAT` | json | `json`, `pretty` or `compact` |
//! | `REQFLOW_LOG_LEVEL` | info | `EnvFilter` directive |

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::scheduler::{
    BatchKeyMode, DedupConfig, NetworkConfig, OfflineConfig, PolicyTable, RateLimits,
    SchedulerConfig, SenderConfig, DEFAULT_OFFLINE_KEY, DEFAULT_PROCESSED_HISTORY,
};
use crate::error::SchedulerError;
use crate::telemetry::{LogConfig, LogFormat};

/// Flat summary of every effective value.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub max_per_second: usize,
    pub max_per_minute: usize,
    pub rate_limit_cooldown_secs: u64,
    pub max_queue_size: usize,
    pub process_interval_ms: u64,
    pub max_concurrent: usize,
    pub request_timeout_secs: u64,
    pub base_url: String,
    pub offline_enabled: bool,
    pub max_offline_queue: usize,
    pub offline_key: String,
    pub offline_dir: String,
    pub dedup_enabled: bool,
    pub dedup_cache_size: usize,
    pub processed_history: usize,
    pub batch_key: &'static str,
    pub health_url: Option<String>,
    pub network_check_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub policy_file: Option<String>,
}

/// Everything loaded from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub scheduler: SchedulerConfig,
    pub offline_dir: PathBuf,
    pub shutdown_timeout: Duration,
    pub policy_file: Option<PathBuf>,
    pub log: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a boolean env var (`true/false`, `1/0`, `yes/no`, `on/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Non-empty string env var.
fn parse_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_batch_key(value: Option<String>) -> BatchKeyMode {
    match value.as_deref() {
        Some("endpoint") => BatchKeyMode::Endpoint,
        _ => BatchKeyMode::EndpointAndPriority,
    }
}

fn batch_key_name(mode: BatchKeyMode) -> &'static str {
    match mode {
        BatchKeyMode::Endpoint => "endpoint",
        BatchKeyMode::EndpointAndPriority => "endpoint_priority",
    }
}

fn load_rate_limits() -> RateLimits {
    let per_second = parse_usize("REQFLOW_MAX_PER_SECOND", 10).max(1);
    let per_minute = parse_usize("REQFLOW_MAX_PER_MINUTE", 300).max(per_second);
    RateLimits { per_second, per_minute }
}

fn load_sender_config() -> SenderConfig {
    let max_concurrent = parse_usize("REQFLOW_MAX_CONCURRENT", 5).clamp(1, 256);
    let timeout_secs = parse_u64("REQFLOW_REQUEST_TIMEOUT", 30).max(1);
    SenderConfig {
        max_concurrent,
        base_url: parse_string("REQFLOW_BASE_URL").unwrap_or_default(),
        request_timeout: Duration::from_secs(timeout_secs),
    }
}

fn load_offline_config() -> OfflineConfig {
    OfflineConfig {
        enabled: parse_bool("REQFLOW_OFFLINE_QUEUE", true),
        max_size: parse_usize("REQFLOW_MAX_OFFLINE_QUEUE", 500).max(1),
        key: parse_string("REQFLOW_OFFLINE_KEY").unwrap_or_else(|| DEFAULT_OFFLINE_KEY.to_string()),
    }
}

fn load_network_config() -> NetworkConfig {
    let interval_secs = parse_u64("REQFLOW_NETWORK_CHECK_INTERVAL", 5).max(1);
    NetworkConfig {
        health_url: parse_string("REQFLOW_HEALTH_URL"),
        check_interval: Duration::from_secs(interval_secs),
    }
}

fn load_log_config() -> LogConfig {
    let format = parse_string("REQFLOW_LOG_FORMAT")
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    LogConfig {
        format,
        level: parse_string("REQFLOW_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        output_path: None,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let cooldown_secs = parse_u64("REQFLOW_RATE_LIMIT_COOLDOWN", 60).clamp(1, 86_400);
    let process_ms = parse_u64("REQFLOW_PROCESS_INTERVAL_MS", 100).clamp(10, 60_000);
    let shutdown_secs = parse_u64("REQFLOW_SHUTDOWN_TIMEOUT", 30).max(1);

    let scheduler = SchedulerConfig {
        rate_limits: load_rate_limits(),
        rate_limit_cooldown: Duration::from_secs(cooldown_secs),
        max_queue_size: parse_usize("REQFLOW_MAX_QUEUE_SIZE", 1000).max(1),
        process_interval: Duration::from_millis(process_ms),
        sender: load_sender_config(),
        offline: load_offline_config(),
        dedup: DedupConfig {
            enabled: parse_bool("REQFLOW_DEDUP", true),
            cache_size: parse_usize("REQFLOW_DEDUP_CACHE_SIZE", 1000).max(1),
            processed_history: parse_usize("REQFLOW_PROCESSED_HISTORY", DEFAULT_PROCESSED_HISTORY).max(1),
        },
        batch_key_mode: parse_batch_key(parse_string("REQFLOW_BATCH_KEY")),
        network: load_network_config(),
        ..SchedulerConfig::default()
    };

    EnvConfig {
        scheduler,
        offline_dir: parse_string("REQFLOW_OFFLINE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".reqflow")),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        policy_file: parse_string("REQFLOW_POLICY_FILE").map(PathBuf::from),
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Policy table from `policy_file`, or the built-in defaults.
    pub fn policies(&self) -> Result<PolicyTable, SchedulerError> {
        match &self.policy_file {
            Some(path) => PolicyTable::from_toml_file(path),
            None => Ok(PolicyTable::default()),
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let s = &self.scheduler;
        EffectiveConfig {
            max_per_second: s.rate_limits.per_second,
            max_per_minute: s.rate_limits.per_minute,
            rate_limit_cooldown_secs: s.rate_limit_cooldown.as_secs(),
            max_queue_size: s.max_queue_size,
            process_interval_ms: s.process_interval.as_millis() as u64,
            max_concurrent: s.sender.max_concurrent,
            request_timeout_secs: s.sender.request_timeout.as_secs(),
            base_url: s.sender.base_url.clone(),
            offline_enabled: s.offline.enabled,
            max_offline_queue: s.offline.max_size,
            offline_key: s.offline.key.clone(),
            offline_dir: self.offline_dir.display().to_string(),
            dedup_enabled: s.dedup.enabled,
            dedup_cache_size: s.dedup.cache_size,
            processed_history: s.dedup.processed_history,
            batch_key: batch_key_name(s.batch_key_mode),
            health_url: s.network.health_url.clone(),
            network_check_interval_secs: s.network.check_interval.as_secs(),
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            policy_file: self.policy_file.as_ref().map(|p| p.display().to_string()),
        }
    }
}
