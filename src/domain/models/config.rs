use serde::{Deserialize, Serialize};

/// Main configuration structure for Colony
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Scheduler loop configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Rate limiting of worker invocations
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Worker registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Completion cascade configuration
    #[serde(default)]
    pub cascade: CascadeConfig,

    /// HTTP worker invoker configuration
    #[serde(default)]
    pub invoker: InvokerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".colony/colony.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; console only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Also write to the console (stderr) when a log directory is set
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,

    /// Rolling policy for log files: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_enable_stdout() -> bool {
    true
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: default_enable_stdout(),
            rotation: default_rotation(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Seconds a lease stays valid before the job may be reclaimed
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Retry budget for newly enqueued jobs
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Upper bound on the exponential retry delay
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

const fn default_lease_ttl_secs() -> u64 {
    300
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_max_backoff_secs() -> u64 {
    3600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl_secs(),
            default_max_attempts: default_max_attempts(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

/// Scheduler loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum jobs claimed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Per-invocation timeout
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Age after which an idle assigned task is re-admitted
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,

    /// Interval between goal backstop sweeps
    #[serde(default = "default_backstop_interval_secs")]
    pub backstop_interval_secs: u64,

    /// Lease owner name; generated per process when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_batch_size() -> u32 {
    10
}

const fn default_invocation_timeout_secs() -> u64 {
    120
}

const fn default_staleness_threshold_secs() -> u64 {
    600
}

const fn default_backstop_interval_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            backstop_interval_secs: default_backstop_interval_secs(),
            owner_id: None,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_second() -> f64 {
    10.0
}

const fn default_burst_size() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Worker registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// YAML file listing worker definitions
    #[serde(default = "default_definitions_path")]
    pub definitions_path: String,

    /// How long loaded definitions are served from cache
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_definitions_path() -> String {
    ".colony/workers.yaml".to_string()
}

const fn default_cache_ttl_secs() -> u64 {
    60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            definitions_path: default_definitions_path(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Completion cascade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CascadeConfig {
    /// Workers whose outputs never count toward task completion
    #[serde(default = "default_orchestration_workers")]
    pub orchestration_workers: Vec<String>,

    /// Worker that receives the goal synthesis job
    #[serde(default = "default_synthesis_worker")]
    pub synthesis_worker: String,

    /// Per-output character limit in the synthesis digest
    #[serde(default = "default_digest_max_chars")]
    pub digest_max_chars: usize,

    /// Mark the goal completed once its synthesis output is recorded
    #[serde(default)]
    pub complete_goal_on_synthesis: bool,
}

fn default_orchestration_workers() -> Vec<String> {
    vec!["request-intake".to_string(), "planner".to_string()]
}

fn default_synthesis_worker() -> String {
    "synthesizer".to_string()
}

const fn default_digest_max_chars() -> usize {
    4000
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            orchestration_workers: default_orchestration_workers(),
            synthesis_worker: default_synthesis_worker(),
            digest_max_chars: default_digest_max_chars(),
            complete_goal_on_synthesis: false,
        }
    }
}

/// HTTP worker invoker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InvokerConfig {
    /// Base URL of the worker host
    #[serde(default = "default_invoker_base_url")]
    pub base_url: String,

    /// Client-side request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_invoker_base_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    110
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_invoker_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
