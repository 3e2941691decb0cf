use serde::{Deserialize, Serialize};

use super::context::StrategyMode;

/// Main configuration structure for promptloop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Model endpoint configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Optimization pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Defaults for multi-round auto-iteration
    #[serde(default)]
    pub auto_iterate: AutoIterateDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            llm: LlmConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            auto_iterate: AutoIterateDefaults::default(),
        }
    }
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
    ".promptloop/promptloop.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
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

    /// Directory for rotated JSON log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation policy for file logs: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
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
            rotation: default_rotation(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// Base URL, without the `/chat/completions` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Inline API key (prefer `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum completion tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

const fn default_llm_timeout_secs() -> u64 {
    120
}

const fn default_temperature() -> f32 {
    0.2
}

const fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
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
    5.0
}

const fn default_burst_size() -> u32 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Tuning knobs for a single optimization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Permits in the shared model-call semaphore
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// How often the cancellation monitor polls the stop predicate
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Run the necessity pre-check before each serial strategy
    #[serde(default = "default_true")]
    pub necessity_check: bool,

    /// Necessity scores below this skip the strategy
    #[serde(default = "default_necessity_threshold")]
    pub necessity_threshold: f64,

    /// Consecutive failing rounds before a sample counts as persistent
    #[serde(default = "default_persistent_error_window")]
    pub persistent_error_window: usize,

    /// Upper bound on failing records handed to strategies
    #[serde(default = "default_max_error_samples")]
    pub max_error_samples: usize,

    /// Failing records used for rapid candidate scoring
    #[serde(default = "default_scoring_sample_size")]
    pub scoring_sample_size: usize,

    /// Ask the model for a task-intent analysis
    #[serde(default = "default_true")]
    pub enable_intent_analysis: bool,

    /// Ask the model for a root-cause analysis
    #[serde(default = "default_true")]
    pub enable_advanced_diagnosis: bool,

    /// Let the model re-rank matched strategies
    #[serde(default = "default_true")]
    pub llm_rerank: bool,

    /// Patch persistent hard cases into the selected candidate
    #[serde(default = "default_true")]
    pub inject_persistent_knowledge: bool,

    /// Rewritten prompts longer than this multiple of the original are rejected
    #[serde(default = "default_max_prompt_growth")]
    pub max_prompt_growth: f64,
}

const fn default_true() -> bool {
    true
}

const fn default_max_concurrency() -> usize {
    5
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_necessity_threshold() -> f64 {
    0.7
}

const fn default_persistent_error_window() -> usize {
    3
}

const fn default_max_error_samples() -> usize {
    20
}

const fn default_scoring_sample_size() -> usize {
    5
}

const fn default_max_prompt_growth() -> f64 {
    4.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            necessity_check: true,
            necessity_threshold: default_necessity_threshold(),
            persistent_error_window: default_persistent_error_window(),
            max_error_samples: default_max_error_samples(),
            scoring_sample_size: default_scoring_sample_size(),
            enable_intent_analysis: true,
            enable_advanced_diagnosis: true,
            llm_rerank: true,
            inject_persistent_knowledge: true,
            max_prompt_growth: default_max_prompt_growth(),
        }
    }
}

impl PipelineConfig {
    pub const fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

/// Defaults applied when an auto-iterate run does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AutoIterateDefaults {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    #[serde(default = "default_target_accuracy")]
    pub target_accuracy: f64,

    #[serde(default)]
    pub strategy_mode: StrategyMode,

    #[serde(default = "default_max_strategies")]
    pub max_strategies: usize,
}

const fn default_max_rounds() -> u32 {
    5
}

const fn default_target_accuracy() -> f64 {
    0.95
}

const fn default_max_strategies() -> usize {
    3
}

impl Default for AutoIterateDefaults {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            target_accuracy: default_target_accuracy(),
            strategy_mode: StrategyMode::default(),
            max_strategies: default_max_strategies(),
        }
    }
}
