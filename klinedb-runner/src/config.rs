//! Ingest configuration.
//!
//! Loaded from TOML, then overridden by environment variables, then by CLI
//! flags. The resulting value is passed explicitly into the pipeline; nothing
//! downstream reads process state.
//!
//! ```toml
//! staging_dir = "downloads"
//! start_date = "2024-09-01"
//! # end_date = "2024-09-30"
//! # concurrency = 8
//!
//! [store]
//! path = "klines.db"
//!
//! [[sources]]
//! base_url = "https://data.binance.vision/data/spot/daily/klines/PEPEUSDC/1m/PEPEUSDC-1m-"
//! exchange = "Binance"
//! ```

use crate::job::Job;
use chrono::{NaiveDate, Utc};
use klinedb_core::fetch::DEFAULT_TIMEOUT;
use klinedb_core::sequence::{
    token_from_base, urls_for_range, ArchiveUrl, DateRange, InvalidDateError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_STORE_PATH: &str = "KLINEDB_STORE_PATH";
pub const ENV_STAGING_DIR: &str = "KLINEDB_STAGING_DIR";
pub const ENV_CONCURRENCY: &str = "KLINEDB_CONCURRENCY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Dates(#[from] InvalidDateError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// Root of the staging area (archives and extracted record files).
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// First day to ingest, `YYYY-MM-DD`.
    pub start_date: String,

    /// Last day to ingest, inclusive. Defaults to yesterday (UTC).
    #[serde(default)]
    pub end_date: Option<String>,

    /// Worker threads. Defaults to the available parallelism.
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    pub store: StoreConfig,

    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

/// One instrument's archive series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// URL prefix; the date and `.zip` are appended per day.
    pub base_url: String,

    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Instrument symbol. Derived from `base_url` when omitted.
    #[serde(default)]
    pub token: Option<String>,
}

impl SourceConfig {
    pub fn resolved_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or_else(|| token_from_base(&self.base_url))
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_exchange() -> String {
    "Binance".to_string()
}

/// Worker count when none is configured.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl IngestConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `KLINEDB_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable lookup (the environment in production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_STAGING_DIR) {
            self.staging_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_CONCURRENCY) {
            let n = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_CONCURRENCY,
                value: value.clone(),
            })?;
            self.concurrency = Some(n);
        }
        Ok(())
    }

    /// Reject configs that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no [[sources]] configured".into()));
        }
        if self.concurrency == Some(0) {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        for source in &self.sources {
            if source.resolved_token().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "cannot derive a token from base_url '{}'; set `token` explicitly",
                    source.base_url
                )));
            }
        }

        // Sources sharing staging paths would skip or overwrite each other's files.
        let mut staged = HashSet::new();
        for source in &self.sources {
            let any_day = NaiveDate::default();
            let url = ArchiveUrl::new(&source.base_url, any_day);
            if !staged.insert((url.series_dir().to_string(), url.file_name().to_string())) {
                return Err(ConfigError::Invalid(format!(
                    "base_url '{}' shares staging files with another source",
                    source.base_url
                )));
            }
        }
        Ok(())
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(default_concurrency)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured date range, with an open end meaning yesterday (UTC).
    pub fn date_range(&self) -> Result<DateRange, InvalidDateError> {
        self.date_range_as_of(Utc::now().date_naive())
    }

    pub fn date_range_as_of(&self, today: NaiveDate) -> Result<DateRange, InvalidDateError> {
        DateRange::parse(&self.start_date, self.end_date.as_deref(), today)
    }

    /// Expand every source over the date range into jobs, source by source.
    pub fn jobs(&self) -> Result<Vec<Job>, ConfigError> {
        self.jobs_as_of(Utc::now().date_naive())
    }

    pub fn jobs_as_of(&self, today: NaiveDate) -> Result<Vec<Job>, ConfigError> {
        self.validate()?;
        let range = self.date_range_as_of(today)?;

        let mut jobs = Vec::with_capacity(range.days() * self.sources.len());
        for source in &self.sources {
            let token = source.resolved_token().ok_or_else(|| {
                ConfigError::Invalid(format!("no token for {}", source.base_url))
            })?;
            for url in urls_for_range(&source.base_url, &range) {
                jobs.push(Job::new(url, &source.exchange, token));
            }
        }
        Ok(jobs)
    }
}
