//! One unit of work: a single day's archive for a single instrument.

use klinedb_core::{ArchiveUrl, ExtractError, FetchError, LoadError, LoadReport};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub url: ArchiveUrl,
    pub exchange: String,
    pub token: String,
}

impl Job {
    pub fn new(url: ArchiveUrl, exchange: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url,
            exchange: exchange.into(),
            token: token.into(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.exchange, self.token, self.url.date())
    }
}

/// Why a job stopped. A failure never spreads beyond its own job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("extract failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),

    /// The job panicked; the message is the panic payload when it was a string.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Pipeline stage the job failed in.
    pub fn stage(&self) -> &'static str {
        match self {
            JobError::Fetch(_) => "fetch",
            JobError::Extract(_) => "extract",
            JobError::Load(_) => "load",
            JobError::Panicked(_) => "panic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSuccess {
    /// False when the staging area already held the archive or record file.
    pub downloaded: bool,
    pub report: LoadReport,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub job: Job,
    pub result: Result<JobSuccess, JobError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn display_names_series_and_day() {
        let url = ArchiveUrl::new(
            "https://data.binance.vision/data/spot/daily/klines/X/1m/X-1m-",
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        );
        let job = Job::new(url, "Binance", "X");
        assert_eq!(job.to_string(), "Binance/X 2024-03-09");
    }

    #[test]
    fn stage_follows_variant() {
        let err = JobError::from(FetchError::Status {
            url: "u".into(),
            status: 404,
        });
        assert_eq!(err.stage(), "fetch");
        assert!(err.to_string().contains("HTTP 404"));
    }
}
