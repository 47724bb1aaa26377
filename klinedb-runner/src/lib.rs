//! klinedb runner: ingest orchestration on top of `klinedb-core`.
//!
//! - TOML configuration with environment overrides
//! - Job model (one archive, one instrument, one day)
//! - Bounded worker pool with per-job fault isolation and a run summary

pub mod config;
pub mod job;
pub mod runner;

pub use config::{default_concurrency, ConfigError, IngestConfig, SourceConfig, StoreConfig};
pub use job::{Job, JobError, JobOutcome, JobSuccess};
pub use runner::{run, Pipeline, RunSummary};
