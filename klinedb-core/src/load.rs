//! Loader: streams a record file into the destination store.
//!
//! All rows of one file are written in a single transaction. A parse error or
//! failed statement anywhere in the file rolls the whole file back, so a failed
//! load never leaves a partial day behind.

use crate::record::{KlineReader, ParseError};
use crate::store::{KlineStore, StoreError, UpsertReport};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed record: {0}")]
    Parse(#[from] ParseError),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Row counts for one loaded file.
pub type LoadReport = UpsertReport;

pub struct Loader {
    store: Arc<dyn KlineStore>,
}

impl Loader {
    pub fn new(store: Arc<dyn KlineStore>) -> Self {
        Self { store }
    }

    /// Upsert every row of `record_path`, tagged with `exchange` and `token`.
    pub fn load(
        &self,
        record_path: &Path,
        exchange: &str,
        token: &str,
    ) -> Result<LoadReport, LoadError> {
        let mut rows = KlineReader::from_path(record_path).map_err(|source| LoadError::Io {
            path: record_path.to_path_buf(),
            source,
        })?;

        let report = self
            .store
            .upsert_file(exchange, token, &mut rows)
            .map_err(|e| match e {
                StoreError::Row(parse) => LoadError::Parse(parse),
                other => LoadError::Store(other),
            })?;

        info!(
            file = %record_path.display(),
            exchange,
            token,
            processed = report.processed,
            inserted = report.inserted,
            "loaded"
        );
        Ok(report)
    }
}
