//! Harvester configuration
//!
//! Values come from the environment (optionally seeded from `.env` by the
//! binary) with the defaults below. The test profile forces a small worker
//! pool, direct connections and a capped todo list.

use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::{FetchSettings, ProxyRotation};
use crate::pipeline::PipelineSettings;

pub const DEFAULT_REGISTRY_URL: &str = "https://safer.fmcsa.dot.gov/query.asp";
pub const DEFAULT_CONCURRENCY: usize = 200;
/// Worker count used by the test profile regardless of `CONCURRENCY`
pub const TEST_CONCURRENCY: usize = 10;
pub const DEFAULT_TEST_LIMIT: usize = 100;

/// Rotating proxy credentials
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    pub username_base: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username_base", &self.username_base)
            .field("password", &"***")
            .finish()
    }
}

/// Main harvester configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Postgres DSN; empty when neither `DATABASE_URL` nor `DB_*` are set
    pub database_url: String,
    /// Proxy settings; `None` when any of the three variables is missing
    pub proxy: Option<ProxyConfig>,
    /// Constrained profile: low concurrency, no proxy, capped todo list
    pub test_mode: bool,
    /// Worker count outside the test profile
    pub concurrency: usize,
    /// Flush threshold for the writer
    pub batch_size: usize,
    /// Attempt budget per fetch (total attempts, not extra retries)
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub registry_url: String,
    pub input_file: PathBuf,
    pub input_column: String,
    /// Todo cap applied in the test profile
    pub test_limit: usize,
    /// Explicit todo cap, applied in any profile (CLI `--limit`)
    pub limit: Option<usize>,
    pub job_queue_capacity: usize,
    pub write_queue_capacity: usize,
    pub progress_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            proxy: None,
            test_mode: false,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: 1000,
            max_retries: 3,
            request_timeout_secs: 15,
            retry_delay_ms: 1000,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            input_file: PathBuf::from("dot_numbers.csv"),
            input_column: "DOT_NUMBER".to_string(),
            test_limit: DEFAULT_TEST_LIMIT,
            limit: None,
            job_queue_capacity: 1000,
            write_queue_capacity: 1000,
            progress_interval_secs: 10,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let number = |key: &str, default: u64| -> anyhow::Result<u64> {
            match var(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer, got: {}", key, raw)),
                None => Ok(default),
            }
        };

        let database_url = match var("DATABASE_URL") {
            Some(url) => url,
            None => assemble_database_url(&var).unwrap_or_default(),
        };

        let proxy = match (var("PROXY_URL"), var("PROXY_USER_BASE"), var("PROXY_PASS")) {
            (Some(url), Some(username_base), Some(password)) => Some(ProxyConfig {
                url,
                username_base,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            proxy,
            test_mode: var("TEST_MODE").map(|v| parse_flag(&v)).unwrap_or(false),
            concurrency: number("CONCURRENCY", defaults.concurrency as u64)? as usize,
            batch_size: number("BATCH_SIZE", defaults.batch_size as u64)? as usize,
            max_retries: number("MAX_RETRIES", defaults.max_retries as u64)? as u32,
            request_timeout_secs: number("REQUEST_TIMEOUT", defaults.request_timeout_secs)?,
            retry_delay_ms: number("RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            registry_url: var("REGISTRY_URL").unwrap_or(defaults.registry_url),
            input_file: var("INPUT_FILE").map(PathBuf::from).unwrap_or(defaults.input_file),
            input_column: var("INPUT_COLUMN").unwrap_or(defaults.input_column),
            test_limit: number("TEST_LIMIT", defaults.test_limit as u64)? as usize,
            limit: None,
            job_queue_capacity: number("JOB_QUEUE_CAPACITY", defaults.job_queue_capacity as u64)?
                as usize,
            write_queue_capacity: number(
                "WRITE_QUEUE_CAPACITY",
                defaults.write_queue_capacity as u64,
            )? as usize,
            progress_interval_secs: number("PROGRESS_INTERVAL_SECS", defaults.progress_interval_secs)?,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!(
                "Database configuration incomplete: set DATABASE_URL or DB_NAME, DB_USER and DB_PASSWORD"
            );
        }
        if !self.test_mode && self.proxy.is_none() {
            anyhow::bail!("PROXY_URL, PROXY_USER_BASE and PROXY_PASS are required outside test mode");
        }
        if self.concurrency == 0 {
            anyhow::bail!("CONCURRENCY must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be greater than 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("MAX_RETRIES must be greater than 0");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT must be greater than 0");
        }
        if self.job_queue_capacity == 0 || self.write_queue_capacity == 0 {
            anyhow::bail!("JOB_QUEUE_CAPACITY and WRITE_QUEUE_CAPACITY must be greater than 0");
        }
        if self.progress_interval_secs == 0 {
            anyhow::bail!("PROGRESS_INTERVAL_SECS must be greater than 0");
        }
        if self.input_column.is_empty() {
            anyhow::bail!("INPUT_COLUMN cannot be empty");
        }
        Ok(())
    }

    /// Number of fetch workers for this profile
    pub fn workers(&self) -> usize {
        if self.test_mode {
            TEST_CONCURRENCY
        } else {
            self.concurrency
        }
    }

    /// Cap on the todo list, if any
    pub fn todo_limit(&self) -> Option<usize> {
        match (self.limit, self.test_mode) {
            (Some(limit), _) => Some(limit),
            (None, true) => Some(self.test_limit),
            (None, false) => None,
        }
    }

    /// Proxy rotation in effect; the test profile always connects directly
    pub fn active_proxy(&self) -> Option<ProxyRotation> {
        if self.test_mode {
            return None;
        }
        self.proxy.as_ref().map(|proxy| {
            ProxyRotation::new(&proxy.url, &proxy.username_base, &proxy.password)
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            endpoint: self.registry_url.clone(),
            max_attempts: self.max_retries,
            retry_delay: self.retry_delay(),
            timeout: self.request_timeout(),
            verbose_failures: self.test_mode,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            workers: self.workers(),
            batch_size: self.batch_size,
            job_queue_capacity: self.job_queue_capacity,
            write_queue_capacity: self.write_queue_capacity,
            progress_interval: self.progress_interval(),
            show_progress_bar: true,
            test_mode: self.test_mode,
        }
    }
}

/// Build a DSN from `DB_*` parts, URL-encoding the credentials
fn assemble_database_url(var: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let name = var("DB_NAME")?;
    let user = var("DB_USER")?;
    let password = var("DB_PASSWORD")?;
    let host = var("DB_HOST").unwrap_or_else(|| "localhost".to_string());
    let port = var("DB_PORT").unwrap_or_else(|| "5432".to_string());

    Some(format!(
        "postgresql://{}:{}@{}:{}/{}",
        urlencoding::encode(&user),
        urlencoding::encode(&password),
        host,
        port,
        name
    ))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
