use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::fetch::{self, RetryPolicy};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub cli: CliSettings,
}

/// Fetcher defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchSettings {
    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub referer: Option<String>,

    #[serde(default)]
    pub enable_cookies: bool,

    #[serde(default = "default_true")]
    pub random_user_agent: bool,

    #[serde(default)]
    pub skip_verify: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Backoff bounds for the defaulted fetcher
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,

    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Command-line behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_min_wait_ms() -> u64 {
    fetch::retry::DEFAULT_MIN_WAIT.as_millis() as u64
}
fn default_max_wait_ms() -> u64 {
    fetch::retry::DEFAULT_MAX_WAIT.as_millis() as u64
}
fn default_max_retries() -> u32 {
    fetch::retry::DEFAULT_MAX_RETRIES
}
fn default_concurrency() -> usize {
    4
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            referer: None,
            enable_cookies: false,
            random_user_agent: true,
            skip_verify: false,
            timeout_secs: default_timeout_secs(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

impl FetchSettings {
    /// Base fetcher config. `timeout_secs = 0` leaves the timeout unset.
    pub fn to_config(&self) -> fetch::Config {
        fetch::Config {
            user_agent: self.user_agent.clone().filter(|s| !s.trim().is_empty()),
            referer: self.referer.clone().filter(|s| !s.trim().is_empty()),
            enable_cookies: self.enable_cookies,
            random_user_agent: self.random_user_agent,
            raise_for_status: true,
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            transport: None,
            skip_verify: self.skip_verify,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.min_wait_ms),
            Duration::from_millis(self.max_wait_ms),
            self.max_retries,
        )
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from `config/default.toml`, `config/local.toml`, an
    /// optional extra file and `METAFETCH__*` environment variables.
    ///
    /// A value that does not fit its setting is an error rather than a silent
    /// fallback, so one typo cannot reset every other setting.
    pub fn load_from(extra: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            );

        if let Some(path) = extra {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let cfg = builder
            .add_source(
                config::Environment::with_prefix("METAFETCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(app_cfg)
    }
}
