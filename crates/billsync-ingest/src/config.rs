//! Sync configuration
//!
//! Tunables come from the environment (after `.env` is loaded) with the
//! `DEFAULT_*` values below as fallbacks. Which collections to pull is
//! described separately by a TOML targets file.

use crate::retry::RetryPolicy;
use crate::validate::ValidationPolicy;
use anyhow::{bail, Context};
use billsync_common::types::CollectionKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_HOST: &str = "https://suthra.punjab.gov.pk";
pub const DEFAULT_USER_TYPE: &str = "HRMIS_USER";
/// Portal-imposed ceiling on listing page size
pub const MAX_PAGE_SIZE: u32 = 250;
pub const DEFAULT_PAGE_SIZE: u32 = 250;
pub const DEFAULT_PEEK_SIZE: u32 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 200;
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_RETRY_DELAY_MS: u64 = 2000;

/// Store-imposed ceiling on rows per upsert call
pub const MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_UPLOAD_RETRY_BASE_DELAY_MS: u64 = 2000;
pub const DEFAULT_WHITELIST_PAGE_SIZE: i64 = 2000;

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_LEDGER_PATH: &str = "./state/ledger.json";
pub const DEFAULT_ORPHAN_LOG_PATH: &str = "./logs/orphaned_records.log";
pub const DEFAULT_PENDING_LOG_PATH: &str = "./logs/pending_records.log";
pub const DEFAULT_PARALLELISM: usize = 1;

/// Parse a raw setting; unset or blank means `default`, anything else must parse
fn parse_setting<T>(key: &str, raw: Option<&str>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{value}': {e}")),
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_setting(key, std::env::var(key).ok().as_deref(), default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Remote portal settings
#[derive(Clone)]
pub struct PortalConfig {
    pub base_host: String,
    pub cnic: String,
    pub password: String,
    pub user_type: String,
    pub page_size: u32,
    pub peek_size: u32,
    pub timeout_secs: u64,
    /// Pause between consecutive page requests
    pub page_delay_ms: u64,
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay_ms: u64,
}

impl fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalConfig")
            .field("base_host", &self.base_host)
            .field("cnic", &self.cnic)
            .field("password", &"<redacted>")
            .field("user_type", &self.user_type)
            .field("page_size", &self.page_size)
            .field("peek_size", &self.peek_size)
            .field("timeout_secs", &self.timeout_secs)
            .field("page_delay_ms", &self.page_delay_ms)
            .field("fetch_max_attempts", &self.fetch_max_attempts)
            .field("fetch_retry_delay_ms", &self.fetch_retry_delay_ms)
            .finish()
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_host: DEFAULT_BASE_HOST.to_string(),
            cnic: String::new(),
            password: String::new(),
            user_type: DEFAULT_USER_TYPE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            peek_size: DEFAULT_PEEK_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            fetch_max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            fetch_retry_delay_ms: DEFAULT_FETCH_RETRY_DELAY_MS,
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            base_host: env_string("PORTAL_BASE_HOST", DEFAULT_BASE_HOST)
                .trim_end_matches('/')
                .to_string(),
            cnic: env_string("PORTAL_CNIC", ""),
            password: env_string("PORTAL_PASSWORD", ""),
            user_type: env_string("PORTAL_USER_TYPE", DEFAULT_USER_TYPE),
            page_size: env_or("PORTAL_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            peek_size: env_or("PORTAL_PEEK_SIZE", DEFAULT_PEEK_SIZE)?,
            timeout_secs: env_or("PORTAL_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
            page_delay_ms: env_or("PORTAL_PAGE_DELAY_MS", DEFAULT_PAGE_DELAY_MS)?,
            fetch_max_attempts: env_or("FETCH_MAX_ATTEMPTS", DEFAULT_FETCH_MAX_ATTEMPTS)?,
            fetch_retry_delay_ms: env_or("FETCH_RETRY_DELAY_MS", DEFAULT_FETCH_RETRY_DELAY_MS)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_host.is_empty() {
            bail!("PORTAL_BASE_HOST must not be empty");
        }
        url::Url::parse(&self.base_host)
            .with_context(|| format!("PORTAL_BASE_HOST is not a valid URL: {}", self.base_host))?;
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            bail!("PORTAL_PAGE_SIZE must be between 1 and {}", MAX_PAGE_SIZE);
        }
        if self.peek_size == 0 {
            bail!("PORTAL_PEEK_SIZE must be greater than 0");
        }
        if self.fetch_max_attempts == 0 {
            bail!("FETCH_MAX_ATTEMPTS must be greater than 0");
        }
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.cnic.is_empty() && !self.password.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Flat pause between page attempts
    pub fn fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.fetch_max_attempts,
            Duration::from_millis(self.fetch_retry_delay_ms),
        )
    }
}

/// Batch upload settings
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub whitelist_page_size: i64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_UPLOAD_RETRY_BASE_DELAY_MS,
            whitelist_page_size: DEFAULT_WHITELIST_PAGE_SIZE,
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            batch_size: env_or("UPLOAD_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            max_attempts: env_or("UPLOAD_MAX_ATTEMPTS", DEFAULT_UPLOAD_MAX_ATTEMPTS)?,
            retry_base_delay_ms: env_or(
                "UPLOAD_RETRY_BASE_DELAY_MS",
                DEFAULT_UPLOAD_RETRY_BASE_DELAY_MS,
            )?,
            whitelist_page_size: env_or("WHITELIST_PAGE_SIZE", DEFAULT_WHITELIST_PAGE_SIZE)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            bail!("UPLOAD_BATCH_SIZE must be between 1 and {}", MAX_BATCH_SIZE);
        }
        if self.max_attempts == 0 {
            bail!("UPLOAD_MAX_ATTEMPTS must be greater than 0");
        }
        if self.whitelist_page_size <= 0 {
            bail!("WHITELIST_PAGE_SIZE must be greater than 0");
        }
        Ok(())
    }

    /// Delay grows with each failed attempt: base, 2x base, 3x base...
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

/// Top-level configuration for one sync run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub portal: PortalConfig,
    pub upload: UploadConfig,
    pub database_url: String,
    pub database_max_connections: u32,
    pub ledger_path: PathBuf,
    pub orphan_log_path: PathBuf,
    pub pending_log_path: PathBuf,
    pub policy: ValidationPolicy,
    /// Collections synchronized concurrently within one phase
    pub parallelism: usize,
}

impl SyncConfig {
    /// Load from `.env` and the process environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let policy = match std::env::var("VALIDATION_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => ValidationPolicy::default(),
        };

        let config = Self {
            portal: PortalConfig::from_env()?,
            upload: UploadConfig::from_env()?,
            database_url: env_string("DATABASE_URL", ""),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
            ledger_path: PathBuf::from(env_string("LEDGER_PATH", DEFAULT_LEDGER_PATH)),
            orphan_log_path: PathBuf::from(env_string("ORPHAN_LOG_PATH", DEFAULT_ORPHAN_LOG_PATH)),
            pending_log_path: PathBuf::from(env_string(
                "PENDING_LOG_PATH",
                DEFAULT_PENDING_LOG_PATH,
            )),
            policy,
            parallelism: env_or("SYNC_PARALLELISM", DEFAULT_PARALLELISM)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.portal.validate()?;
        self.upload.validate()?;
        if self.parallelism == 0 {
            bail!("SYNC_PARALLELISM must be greater than 0");
        }
        if self.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        Ok(())
    }
}

/// Filter values may be written as TOML strings or integers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Int(i64),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(s) => f.write_str(s),
            FilterValue::Int(n) => write!(f, "{}", n),
        }
    }
}

/// One collection to synchronize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique collection key; also the ledger key
    pub name: String,
    pub kind: CollectionKind,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValue>,
    /// Active designation to switch to before fetching
    #[serde(default)]
    pub designation_id: Option<i64>,
    /// Bills only: keep records whose `month_str` matches
    #[serde(default)]
    pub month: Option<String>,
    /// Area names copied into records lacking them
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Target {
    pub fn new(name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            filters: BTreeMap::new(),
            designation_id: None,
            month: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), FilterValue::Text(value.into()));
        self
    }

    /// Filters rendered as strings, the form the portal expects
    pub fn filter_strings(&self) -> BTreeMap<String, String> {
        self.filters
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

/// Parsed targets file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsFile {
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl TargetsFile {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read targets file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid targets file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let file: TargetsFile = toml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                bail!("target names must not be empty");
            }
            if !seen.insert(target.name.as_str()) {
                bail!("duplicate target name '{}'", target.name);
            }
            if target.month.is_some() && target.kind != CollectionKind::Bills {
                bail!("target '{}': month filter applies to bills only", target.name);
            }
        }
        Ok(())
    }

    /// Restrict to a single named target
    pub fn only(self, name: &str) -> anyhow::Result<Self> {
        let targets: Vec<Target> = self.targets.into_iter().filter(|t| t.name == name).collect();
        if targets.is_empty() {
            bail!("no target named '{}'", name);
        }
        Ok(Self { targets })
    }
}
