//! Configuration loading for the trigger engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `SYNCLINE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `SYNCLINE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Sweep cadence, batching and circuit-breaker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    /// Seconds between background sweeps.
    #[serde(default = "default_scheduler_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// A trigger is due when it has not been checked for this many seconds.
    #[serde(default = "default_scheduler_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Number of triggers processed concurrently per batch.
    #[serde(default = "default_scheduler_batch_size")]
    pub batch_size: usize,
    /// Whether each sweep also re-delivers events whose retry time elapsed.
    #[serde(default = "default_scheduler_retry_sweep_enabled")]
    pub retry_sweep_enabled: bool,
    /// Consecutive trigger-level failures after which a trigger is disabled.
    #[serde(default = "default_trigger_max_consecutive_errors")]
    pub max_consecutive_errors: i32,
}

/// Webhook delivery parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DeliveryConfig {
    /// Hard timeout for one webhook request.
    #[serde(default = "default_webhook_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Pending events older than this are picked up by the retry sweep.
    #[serde(default = "default_stale_pending_after_seconds")]
    pub stale_pending_after_seconds: u64,
}

/// Upstream source API parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SourcesConfig {
    #[serde(default = "default_source_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_google_sheets_api_base")]
    pub google_sheets_api_base: String,
    #[serde(default = "default_google_calendar_api_base")]
    pub google_calendar_api_base: String,
    #[serde(default = "default_google_drive_api_base")]
    pub google_drive_api_base: String,
    /// Upper bound on items requested per page from list endpoints.
    #[serde(default = "default_source_page_size")]
    pub page_size: u32,
}

/// Retention of terminal delivery records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetentionConfig {
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            scheduler: SchedulerConfig::default(),
            delivery: DeliveryConfig::default(),
            sources: SourcesConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_scheduler_tick_interval_seconds(),
            poll_interval_seconds: default_scheduler_poll_interval_seconds(),
            batch_size: default_scheduler_batch_size(),
            retry_sweep_enabled: default_scheduler_retry_sweep_enabled(),
            max_consecutive_errors: default_trigger_max_consecutive_errors(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_webhook_timeout_seconds(),
            stale_pending_after_seconds: default_stale_pending_after_seconds(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: default_source_fetch_timeout_seconds(),
            google_sheets_api_base: default_google_sheets_api_base(),
            google_calendar_api_base: default_google_calendar_api_base(),
            google_drive_api_base: default_google_drive_api_base(),
            page_size: default_source_page_size(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            event_retention_days: default_event_retention_days(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        config.database_url = redact_database_url(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.profile.as_str(), "local" | "test") && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.scheduler.validate()?;
        self.delivery.validate()?;
        self.sources.validate()?;

        if self.retention.event_retention_days == 0 {
            return Err(ConfigError::InvalidRetentionDays {
                value: self.retention.event_retention_days,
            });
        }

        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 10 || self.tick_interval_seconds > 3600 {
            return Err(ConfigError::InvalidSchedulerTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if self.poll_interval_seconds < 60 || self.poll_interval_seconds > 86400 {
            return Err(ConfigError::InvalidPollInterval {
                value: self.poll_interval_seconds,
            });
        }

        if self.batch_size == 0 || self.batch_size > 100 {
            return Err(ConfigError::InvalidBatchSize {
                value: self.batch_size,
            });
        }

        if self.max_consecutive_errors < 1 {
            return Err(ConfigError::InvalidMaxConsecutiveErrors {
                value: self.max_consecutive_errors,
            });
        }

        Ok(())
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds == 0 || self.timeout_seconds > 300 {
            return Err(ConfigError::InvalidWebhookTimeout {
                value: self.timeout_seconds,
            });
        }

        // A stale window shorter than the webhook timeout would race in-flight deliveries.
        if self.stale_pending_after_seconds < self.timeout_seconds {
            return Err(ConfigError::InvalidStalePendingWindow {
                value: self.stale_pending_after_seconds,
                timeout: self.timeout_seconds,
            });
        }

        Ok(())
    }
}

impl SourcesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_seconds == 0 || self.fetch_timeout_seconds > 300 {
            return Err(ConfigError::InvalidSourceFetchTimeout {
                value: self.fetch_timeout_seconds,
            });
        }

        if self.page_size == 0 || self.page_size > 1000 {
            return Err(ConfigError::InvalidSourcePageSize {
                value: self.page_size,
            });
        }

        for (field, value) in [
            ("GOOGLE_SHEETS_API_BASE", &self.google_sheets_api_base),
            ("GOOGLE_CALENDAR_API_BASE", &self.google_calendar_api_base),
            ("GOOGLE_DRIVE_API_BASE", &self.google_drive_api_base),
        ] {
            if url::Url::parse(value).is_err() {
                return Err(ConfigError::InvalidApiBase {
                    field,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

/// Drops userinfo from a database URL, keeping scheme, host and path.
fn redact_database_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.username().is_empty() && parsed.password().is_none() {
                return raw.to_string();
            }
            if parsed.set_password(None).is_err() || parsed.set_username("").is_err() {
                return "[REDACTED]".to_string();
            }
            parsed.as_str().replacen("://", "://[REDACTED]@", 1)
        }
        Err(_) if raw.contains('@') => "[REDACTED]".to_string(),
        Err(_) => raw.to_string(),
    }
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/syncline".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_scheduler_tick_interval_seconds() -> u64 {
    300
}

fn default_scheduler_poll_interval_seconds() -> u64 {
    300
}

fn default_scheduler_batch_size() -> usize {
    10
}

fn default_scheduler_retry_sweep_enabled() -> bool {
    true
}

fn default_trigger_max_consecutive_errors() -> i32 {
    10
}

fn default_webhook_timeout_seconds() -> u64 {
    30
}

fn default_stale_pending_after_seconds() -> u64 {
    600
}

fn default_source_fetch_timeout_seconds() -> u64 {
    30
}

fn default_google_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_google_calendar_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_google_drive_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_source_page_size() -> u32 {
    250
}

fn default_event_retention_days() -> u32 {
    30
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no operator tokens configured; set SYNCLINE_OPERATOR_TOKEN or SYNCLINE_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("scheduler tick interval must be between 10 and 3600 seconds, got {value}")]
    InvalidSchedulerTickInterval { value: u64 },
    #[error("trigger poll interval must be between 60 and 86400 seconds, got {value}")]
    InvalidPollInterval { value: u64 },
    #[error("scheduler batch size must be between 1 and 100, got {value}")]
    InvalidBatchSize { value: usize },
    #[error("max consecutive trigger errors must be at least 1, got {value}")]
    InvalidMaxConsecutiveErrors { value: i32 },
    #[error("webhook timeout must be between 1 and 300 seconds, got {value}")]
    InvalidWebhookTimeout { value: u64 },
    #[error(
        "stale pending window ({value}s) must not be shorter than the webhook timeout ({timeout}s)"
    )]
    InvalidStalePendingWindow { value: u64, timeout: u64 },
    #[error("source fetch timeout must be between 1 and 300 seconds, got {value}")]
    InvalidSourceFetchTimeout { value: u64 },
    #[error("source page size must be between 1 and 1000, got {value}")]
    InvalidSourcePageSize { value: u32 },
    #[error("{field} is not a valid URL: '{value}'")]
    InvalidApiBase { field: &'static str, value: String },
    #[error("event retention must be at least 1 day, got {value}")]
    InvalidRetentionDays { value: u32 },
}

/// Loads configuration using layered `.env` files and `SYNCLINE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.{profile}`, `.env.{profile}.local`, then
    /// the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("SYNCLINE_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);

        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = layered.remove("OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let config = AppConfig {
            profile,
            api_bind_addr: take_string(&mut layered, "API_BIND_ADDR", default_api_bind_addr),
            log_level: take_string(&mut layered, "LOG_LEVEL", default_log_level),
            log_format: take_string(&mut layered, "LOG_FORMAT", default_log_format),
            database_url: take_string(&mut layered, "DATABASE_URL", default_database_url),
            db_max_connections: take_parsed(
                &mut layered,
                "DB_MAX_CONNECTIONS",
                default_db_max_connections,
            ),
            db_acquire_timeout_ms: take_parsed(
                &mut layered,
                "DB_ACQUIRE_TIMEOUT_MS",
                default_db_acquire_timeout_ms,
            ),
            operator_tokens,
            scheduler: SchedulerConfig {
                tick_interval_seconds: take_parsed(
                    &mut layered,
                    "SCHEDULER_TICK_INTERVAL_SECONDS",
                    default_scheduler_tick_interval_seconds,
                ),
                poll_interval_seconds: take_parsed(
                    &mut layered,
                    "SCHEDULER_POLL_INTERVAL_SECONDS",
                    default_scheduler_poll_interval_seconds,
                ),
                batch_size: take_parsed(
                    &mut layered,
                    "SCHEDULER_BATCH_SIZE",
                    default_scheduler_batch_size,
                ),
                retry_sweep_enabled: take_parsed(
                    &mut layered,
                    "SCHEDULER_RETRY_SWEEP_ENABLED",
                    default_scheduler_retry_sweep_enabled,
                ),
                max_consecutive_errors: take_parsed(
                    &mut layered,
                    "TRIGGER_MAX_CONSECUTIVE_ERRORS",
                    default_trigger_max_consecutive_errors,
                ),
            },
            delivery: DeliveryConfig {
                timeout_seconds: take_parsed(
                    &mut layered,
                    "WEBHOOK_TIMEOUT_SECONDS",
                    default_webhook_timeout_seconds,
                ),
                stale_pending_after_seconds: take_parsed(
                    &mut layered,
                    "STALE_PENDING_AFTER_SECONDS",
                    default_stale_pending_after_seconds,
                ),
            },
            sources: SourcesConfig {
                fetch_timeout_seconds: take_parsed(
                    &mut layered,
                    "SOURCE_FETCH_TIMEOUT_SECONDS",
                    default_source_fetch_timeout_seconds,
                ),
                google_sheets_api_base: take_string(
                    &mut layered,
                    "GOOGLE_SHEETS_API_BASE",
                    default_google_sheets_api_base,
                ),
                google_calendar_api_base: take_string(
                    &mut layered,
                    "GOOGLE_CALENDAR_API_BASE",
                    default_google_calendar_api_base,
                ),
                google_drive_api_base: take_string(
                    &mut layered,
                    "GOOGLE_DRIVE_API_BASE",
                    default_google_drive_api_base,
                ),
                page_size: take_parsed(&mut layered, "SOURCE_PAGE_SIZE", default_source_page_size),
            },
            retention: RetentionConfig {
                event_retention_days: take_parsed(
                    &mut layered,
                    "EVENT_RETENTION_DAYS",
                    default_event_retention_days,
                ),
            },
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("SYNCLINE_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("SYNCLINE_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> String,
) -> String {
    layered
        .remove(key)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(default)
}

fn take_parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> T,
) -> T {
    layered
        .remove(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(default)
}
