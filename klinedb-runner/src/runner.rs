//! Job runner: drives every job through fetch, extract and load on a bounded
//! worker pool.
//!
//! Jobs are independent. Each one runs its stages in order and its failure is
//! recorded in the summary without affecting any other job. The run itself
//! only ends early if it never starts (bad configuration).

use crate::job::{Job, JobError, JobOutcome, JobSuccess};
use klinedb_core::{
    ArchiveSource, Extractor, FetchOutcome, Fetcher, KlineStore, Loader, StagingLayout,
};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The three stages, shared by every worker.
pub struct Pipeline {
    fetcher: Fetcher,
    extractor: Extractor,
    loader: Loader,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        staging: StagingLayout,
        store: Arc<dyn KlineStore>,
    ) -> Self {
        Self {
            fetcher: Fetcher::new(source, staging.clone()),
            extractor: Extractor::new(staging),
            loader: Loader::new(store),
        }
    }

    pub fn staging(&self) -> &StagingLayout {
        self.fetcher.layout()
    }

    /// Run one job to completion. Re-running a finished job reloads its record
    /// file, which the store treats as a no-op.
    pub fn process(&self, job: &Job) -> Result<JobSuccess, JobError> {
        let (downloaded, record) = match self.fetcher.fetch(&job.url)? {
            FetchOutcome::AlreadyExtracted(record) => (false, record),
            FetchOutcome::ArchivePending(_) => (false, self.extractor.extract(&job.url)?),
            FetchOutcome::Downloaded { .. } => (true, self.extractor.extract(&job.url)?),
        };

        let report = self.loader.load(&record, &job.exchange, &job.token)?;
        Ok(JobSuccess { downloaded, report })
    }
}

/// Per-job outcomes of one run, in job order.
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<JobOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(JobOutcome::is_success)
    }

    /// Jobs that hit the network this run.
    pub fn downloaded(&self) -> usize {
        self.successes().filter(|s| s.downloaded).count()
    }

    pub fn rows_processed(&self) -> usize {
        self.successes().map(|s| s.report.processed).sum()
    }

    pub fn rows_inserted(&self) -> usize {
        self.successes().map(|s| s.report.inserted).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Job, &JobError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.job, e)))
    }

    fn successes(&self) -> impl Iterator<Item = &JobSuccess> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }
}

fn run_job(pipeline: &Pipeline, job: Job) -> JobOutcome {
    // A panic ends this job only.
    let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(&job)))
        .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))));
    match &result {
        Ok(success) => debug!(
            job = %job,
            downloaded = success.downloaded,
            inserted = success.report.inserted,
            "job done"
        ),
        Err(e) => warn!(job = %job, url = %job.url, stage = e.stage(), error = %e, "job failed"),
    }
    JobOutcome { job, result }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Process `jobs` with at most `concurrency` running at once.
///
/// Returns once every job has finished or failed. Outcomes keep the input order.
pub fn run(jobs: Vec<Job>, concurrency: usize, pipeline: &Pipeline) -> RunSummary {
    let started = Instant::now();
    let workers = concurrency.max(1);
    info!(jobs = jobs.len(), workers, "starting ingest run");

    let pool = if workers > 1 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("klinedb-worker-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "could not build worker pool, running jobs sequentially");
                None
            }
        }
    } else {
        None
    };

    let outcomes: Vec<JobOutcome> = if let Some(pool) = pool {
        pool.install(|| {
            jobs.into_par_iter()
                .map(|job| run_job(pipeline, job))
                .collect()
        })
    } else {
        jobs.into_iter().map(|job| run_job(pipeline, job)).collect()
    };

    let summary = RunSummary {
        outcomes,
        elapsed: started.elapsed(),
    };
    info!(
        total = summary.total(),
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        downloaded = summary.downloaded(),
        inserted = summary.rows_inserted(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "ingest run finished"
    );
    summary
}
