use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub locking: LockingRules,
    #[serde(default)]
    pub reclaimer: ReclaimerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// Which inventory store backs the service
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockingRules {
    #[serde(default = "default_hold_seconds")]
    pub default_hold_seconds: u64,
    #[serde(default = "default_max_hold_seconds")]
    pub max_hold_seconds: u64,
    #[serde(default = "default_lock_wait_millis")]
    pub lock_wait_millis: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_millis")]
    pub retry_backoff_millis: u64,
    #[serde(default = "default_max_backoff_millis")]
    pub max_backoff_millis: u64,
}

impl LockingRules {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_millis)
    }
}

impl Default for LockingRules {
    fn default() -> Self {
        Self {
            default_hold_seconds: default_hold_seconds(),
            max_hold_seconds: default_max_hold_seconds(),
            lock_wait_millis: default_lock_wait_millis(),
            max_retries: default_max_retries(),
            retry_backoff_millis: default_retry_backoff_millis(),
            max_backoff_millis: default_max_backoff_millis(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReclaimerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: i64,
}

impl ReclaimerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: default_sweep_interval(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

fn default_true() -> bool { true }
fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }
fn default_hold_seconds() -> u64 { 300 }
fn default_max_hold_seconds() -> u64 { 1800 }
fn default_lock_wait_millis() -> u64 { 2000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_backoff_millis() -> u64 { 25 }
fn default_max_backoff_millis() -> u64 { 500 }
fn default_sweep_interval() -> u64 { 10 }
fn default_sweep_batch_size() -> i64 { 100 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `MARQUEE__LOCKING__LOCK_WAIT_MILLIS=500`
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
