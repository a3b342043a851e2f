use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use domain::models::api_client::RateLimitTier;
use domain::services::retry::RetryPolicy;
use serde::Deserialize;

use crate::middleware::logging::LogFormat;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn pool_settings(&self) -> persistence::db::PoolSettings {
        persistence::db::PoolSettings {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            acquire_timeout: Duration::from_secs(self.connect_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json`, `pretty` or `compact`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Bearer token for the admin API. Empty disables the admin API.
    #[serde(default)]
    pub admin_token: String,

    /// Take the client IP from the first `X-Forwarded-For` entry.
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Argon2id memory cost for API key hashes
    #[serde(default = "default_key_hash_memory")]
    pub key_hash_memory_kib: u32,

    #[serde(default = "default_key_hash_iterations")]
    pub key_hash_iterations: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            admin_token: String::new(),
            trust_forwarded_for: false,
            key_hash_memory_kib: default_key_hash_memory(),
            key_hash_iterations: default_key_hash_iterations(),
        }
    }
}

impl SecurityConfig {
    pub fn hash_cost(&self) -> shared::hashing::HashCost {
        shared::hashing::HashCost {
            memory_kib: self.key_hash_memory_kib,
            iterations: self.key_hash_iterations,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionConfig {
    /// Master secret the webhook secret cipher key is derived from.
    #[serde(default)]
    pub master_key: String,
}

/// Per-minute request limits by tier.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_standard_limit")]
    pub standard: u32,

    #[serde(default = "default_elevated_limit")]
    pub elevated: u32,

    #[serde(default = "default_premium_limit")]
    pub premium: u32,

    #[serde(default = "default_enterprise_limit")]
    pub enterprise: u32,

    /// How often idle windows are dropped.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            standard: default_standard_limit(),
            elevated: default_elevated_limit(),
            premium: default_premium_limit(),
            enterprise: default_enterprise_limit(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Standard => self.standard,
            RateLimitTier::Elevated => self.elevated,
            RateLimitTier::Premium => self.premium,
            RateLimitTier::Enterprise => self.enterprise,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Outbound request timeout, single-digit seconds
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: i64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: i64,

    /// Consecutive failed attempts before a webhook is switched off. 0 never disables.
    #[serde(default = "default_auto_disable")]
    pub auto_disable_after_failures: u32,

    /// Outbound requests in flight per batch. 1 delivers sequentially.
    #[serde(default = "default_delivery_concurrency")]
    pub delivery_concurrency: usize,

    /// Characters of subscriber response body kept per attempt.
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout(),
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_secs: default_max_delay(),
            auto_disable_after_failures: default_auto_disable(),
            delivery_concurrency: default_delivery_concurrency(),
            response_body_limit: default_response_body_limit(),
        }
    }
}

impl WebhookConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: chrono::Duration::seconds(self.initial_delay_secs),
            multiplier: self.backoff_multiplier,
            max_delay: chrono::Duration::seconds(self.max_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Master switch for every background job.
    #[serde(default = "default_jobs_enabled")]
    pub enabled: bool,

    #[serde(default = "default_delivery_schedule")]
    pub delivery_schedule: String,

    #[serde(default = "default_delivery_batch_size")]
    pub delivery_batch_size: i64,

    #[serde(default = "default_retry_schedule")]
    pub retry_schedule: String,

    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: i64,

    #[serde(default = "default_cleanup_schedule")]
    pub cleanup_schedule: String,

    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: default_jobs_enabled(),
            delivery_schedule: default_delivery_schedule(),
            delivery_batch_size: default_delivery_batch_size(),
            retry_schedule: default_retry_schedule(),
            retry_batch_size: default_retry_batch_size(),
            cleanup_schedule: default_cleanup_schedule(),
            event_retention_days: default_event_retention_days(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_key_hash_memory() -> u32 {
    19456
}
fn default_key_hash_iterations() -> u32 {
    2
}
fn default_window_secs() -> u64 {
    60
}
fn default_standard_limit() -> u32 {
    1000
}
fn default_elevated_limit() -> u32 {
    2500
}
fn default_premium_limit() -> u32 {
    5000
}
fn default_enterprise_limit() -> u32 {
    10000
}
fn default_purge_interval() -> u64 {
    300
}
fn default_webhook_timeout() -> u64 {
    5
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay() -> i64 {
    60
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_max_delay() -> i64 {
    3600
}
fn default_auto_disable() -> u32 {
    10
}
fn default_delivery_concurrency() -> usize {
    4
}
fn default_response_body_limit() -> usize {
    1024
}
fn default_jobs_enabled() -> bool {
    true
}
fn default_delivery_schedule() -> String {
    "*/1 * * * *".to_string()
}
fn default_delivery_batch_size() -> i64 {
    50
}
fn default_retry_schedule() -> String {
    "*/5 * * * *".to_string()
}
fn default_retry_batch_size() -> i64 {
    25
}
fn default_cleanup_schedule() -> String {
    "0 3 * * *".to_string()
}
fn default_event_retention_days() -> u32 {
    90
}

/// Parses a 5-field cron expression, or a 6/7-field one with seconds.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, String> {
    let expression = expression.trim();
    let parsed = if expression.split_whitespace().count() == 5 {
        cron::Schedule::from_str(&format!("0 {}", expression))
    } else {
        cron::Schedule::from_str(expression)
    };
    parsed.map_err(|e| e.to_string())
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with EHS__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("EHS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("security.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Builds a configuration from built-in defaults plus `overrides`,
    /// without reading config files or the environment. Not validated.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "EHS__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.encryption.master_key.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "EHS__ENCRYPTION__MASTER_KEY environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        let tiers = [
            RateLimitTier::Standard,
            RateLimitTier::Elevated,
            RateLimitTier::Premium,
            RateLimitTier::Enterprise,
        ];
        if let Some(tier) = tiers
            .into_iter()
            .find(|tier| self.rate_limits.limit_for(*tier) == 0)
        {
            return Err(ConfigValidationError::InvalidValue(format!(
                "rate_limits.{} must be greater than 0",
                tier
            )));
        }

        if let Err(e) = self.logging.format.parse::<LogFormat>() {
            return Err(ConfigValidationError::InvalidValue(format!("logging.format: {}", e)));
        }

        if self.rate_limits.window_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "rate_limits.window_secs must be greater than 0".to_string(),
            ));
        }

        if self.webhooks.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.max_attempts must be greater than 0".to_string(),
            ));
        }

        if !(1..=9).contains(&self.webhooks.timeout_secs) {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.timeout_secs must be between 1 and 9".to_string(),
            ));
        }

        if self.webhooks.delivery_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.delivery_concurrency must be greater than 0".to_string(),
            ));
        }

        for (name, expression) in [
            ("jobs.delivery_schedule", &self.jobs.delivery_schedule),
            ("jobs.retry_schedule", &self.jobs.retry_schedule),
            ("jobs.cleanup_schedule", &self.jobs.cleanup_schedule),
        ] {
            parse_cron(expression).map_err(|e| {
                ConfigValidationError::InvalidValue(format!(
                    "{} '{}' is not a valid cron expression: {}",
                    name, expression, e
                ))
            })?;
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
