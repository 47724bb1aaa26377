//! Extractor: unpacks a downloaded archive into its per-day directory.
//!
//! Entries are unpacked into a scratch `{stem}.extracting/` directory, which is
//! renamed to `{stem}/` only after the expected record file is present. A crash
//! mid-extract therefore never leaves a truncated `{stem}/{stem}.csv` that would
//! pass for a finished day.
//!
//! On success the archive is deleted, leaving only `{stem}/{stem}.csv`. On
//! failure the archive and the scratch directory are removed, so the next run
//! starts that day from a clean download instead of retrying a bad file forever.

use crate::sequence::ArchiveUrl;
use crate::staging::{unpack_dir_for, StagingLayout};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("corrupt archive {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {} did not contain expected record file {expected}", path.display())]
    MissingRecordFile { path: PathBuf, expected: String },

    #[error("extract I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct Extractor {
    layout: StagingLayout,
}

impl Extractor {
    pub fn new(layout: StagingLayout) -> Self {
        Self { layout }
    }

    /// Extract the staged archive for `url`, returning the record file path.
    pub fn extract(&self, url: &ArchiveUrl) -> Result<PathBuf, ExtractError> {
        extract_archive(
            &self.layout.archive_path(url),
            &self.layout.extract_dir(url),
            &url.record_file_name(),
        )
    }
}

/// Unpack `archive` and publish it as `extract_dir`, check that `expected` is
/// among the extracted files, then delete `archive`.
pub fn extract_archive(
    archive: &Path,
    extract_dir: &Path,
    expected: &str,
) -> Result<PathBuf, ExtractError> {
    let scratch = unpack_dir_for(extract_dir);

    if let Err(e) = unpack(archive, &scratch) {
        warn!(archive = %archive.display(), error = %e, "discarding unreadable archive");
        discard(archive, &scratch);
        return Err(e);
    }

    if !scratch.join(expected).is_file() {
        discard(archive, &scratch);
        return Err(ExtractError::MissingRecordFile {
            path: archive.to_path_buf(),
            expected: expected.to_string(),
        });
    }

    publish(&scratch, extract_dir)?;

    fs::remove_file(archive).map_err(|source| ExtractError::Io {
        path: archive.to_path_buf(),
        source,
    })?;

    let record = extract_dir.join(expected);
    debug!(record = %record.display(), "extracted");
    Ok(record)
}

fn unpack(archive: &Path, scratch: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive).map_err(|source| ExtractError::Io {
        path: archive.to_path_buf(),
        source,
    })?;

    let corrupt = |source| ExtractError::Corrupt {
        path: archive.to_path_buf(),
        source,
    };
    let mut reader = ZipArchive::new(file).map_err(corrupt)?;

    let scratch_io = |source| ExtractError::Io {
        path: scratch.to_path_buf(),
        source,
    };
    // Left over from an interrupted run.
    remove_dir_if_present(scratch).map_err(scratch_io)?;
    fs::create_dir_all(scratch).map_err(scratch_io)?;

    reader.extract(scratch).map_err(corrupt)
}

/// Rename the fully unpacked scratch directory into its final place.
fn publish(scratch: &Path, extract_dir: &Path) -> Result<(), ExtractError> {
    let io = |source| ExtractError::Io {
        path: extract_dir.to_path_buf(),
        source,
    };
    remove_dir_if_present(extract_dir).map_err(io)?;
    fs::rename(scratch, extract_dir).map_err(io)
}

fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn discard(archive: &Path, scratch: &Path) {
    let _ = fs::remove_file(archive);
    let _ = fs::remove_dir_all(scratch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagingState;
    use chrono::NaiveDate;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn url() -> ArchiveUrl {
        ArchiveUrl::new(
            "https://data.binance.vision/data/spot/daily/klines/X/1m/X-1m-",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
    }

    fn write_zip(path: &Path, entry: &str, content: &str) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        writer.start_file(entry, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_record_and_removes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path());
        let u = url();
        layout.ensure_series_dir(&u).unwrap();
        write_zip(&layout.archive_path(&u), "X-1m-2024-01-01.csv", "1,2,3\n");

        let record = Extractor::new(layout.clone()).extract(&u).unwrap();

        assert_eq!(record, layout.record_path(&u));
        assert_eq!(fs::read_to_string(&record).unwrap(), "1,2,3\n");
        assert!(!layout.archive_path(&u).exists());
    }

    #[test]
    fn corrupt_archive_is_rejected_and_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path());
        let u = url();
        layout.ensure_series_dir(&u).unwrap();
        fs::write(layout.archive_path(&u), b"this is not a zip file").unwrap();

        let err = Extractor::new(layout.clone()).extract(&u).unwrap_err();

        assert!(matches!(err, ExtractError::Corrupt { .. }));
        assert!(!layout.archive_path(&u).exists());
        assert!(!layout.extract_dir(&u).exists());
        assert!(!layout.unpack_dir(&u).exists());
    }

    #[test]
    fn unexpected_contents_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path());
        let u = url();
        layout.ensure_series_dir(&u).unwrap();
        write_zip(&layout.archive_path(&u), "something-else.csv", "1,2\n");

        let err = Extractor::new(layout.clone()).extract(&u).unwrap_err();

        match err {
            ExtractError::MissingRecordFile { expected, .. } => {
                assert_eq!(expected, "X-1m-2024-01-01.csv")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!layout.record_path(&u).exists());
        assert!(!layout.unpack_dir(&u).exists());
    }

    #[test]
    fn interrupted_unpack_is_redone_from_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path());
        let u = url();
        layout.ensure_series_dir(&u).unwrap();
        write_zip(&layout.archive_path(&u), "X-1m-2024-01-01.csv", "1,2,3\n4,5,6\n");

        let scratch = layout.unpack_dir(&u);
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join("X-1m-2024-01-01.csv"), "1,2,3\n").unwrap();
        assert_eq!(layout.state(&u), StagingState::ArchivePresent);

        let record = Extractor::new(layout.clone()).extract(&u).unwrap();

        assert_eq!(fs::read_to_string(&record).unwrap(), "1,2,3\n4,5,6\n");
        assert!(!scratch.exists());
        assert_eq!(layout.state(&u), StagingState::Extracted);
    }

    #[test]
    fn stale_extract_dir_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path());
        let u = url();
        layout.ensure_series_dir(&u).unwrap();
        fs::create_dir_all(layout.extract_dir(&u)).unwrap();
        fs::write(layout.extract_dir(&u).join("junk.txt"), "x").unwrap();
        write_zip(&layout.archive_path(&u), "X-1m-2024-01-01.csv", "1,2,3\n");

        Extractor::new(layout.clone()).extract(&u).unwrap();

        assert!(layout.record_path(&u).is_file());
        assert!(!layout.extract_dir(&u).join("junk.txt").exists());
    }

    #[test]
    fn missing_archive_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path());
        let err = Extractor::new(layout).extract(&url()).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }
}
