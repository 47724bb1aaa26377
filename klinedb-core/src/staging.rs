//! Staging area layout and per-archive lifecycle.
//!
//! Every archive lives under its series directory, `{root}/{series}/`, where
//! `{series}` is the URL's host and path without the file prefix
//! (`data.binance.vision/data/spot/daily/klines/X/1m`). Two sources publishing
//! files with the same name therefore never share staging paths.
//!
//! Within a series directory: `{stem}.zip` while downloaded, `{stem}/{stem}.csv`
//! once extracted. In-flight downloads go to `{stem}.zip.part` and archives are
//! unpacked into `{stem}.extracting/`; both are renamed into place only when
//! complete.
//!
//! The filesystem is the only record of progress: a re-run recovers each
//! archive's state by checking which files exist.

use crate::sequence::ArchiveUrl;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where one day's data currently is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    /// Nothing staged yet (a stray `.part` file counts as nothing).
    Absent,
    /// Complete archive downloaded, not yet extracted. A leftover
    /// `.extracting` directory does not change this.
    ArchivePresent,
    /// Record file extracted. Terminal: the archive has been removed.
    Extracted,
}

/// Path scheme for the staging root. Each archive gets disjoint paths.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{series}/`
    pub fn series_dir(&self, url: &ArchiveUrl) -> PathBuf {
        self.root.join(url.series_dir())
    }

    /// Create the series directory for `url` if missing.
    pub fn ensure_series_dir(&self, url: &ArchiveUrl) -> io::Result<PathBuf> {
        let dir = self.series_dir(url);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// `{root}/{series}/{stem}.zip`
    pub fn archive_path(&self, url: &ArchiveUrl) -> PathBuf {
        self.series_dir(url).join(url.file_name())
    }

    /// `{root}/{series}/{stem}.zip.part`
    pub fn partial_path(&self, url: &ArchiveUrl) -> PathBuf {
        self.series_dir(url).join(format!("{}.part", url.file_name()))
    }

    /// `{root}/{series}/{stem}/`
    pub fn extract_dir(&self, url: &ArchiveUrl) -> PathBuf {
        self.series_dir(url).join(url.stem())
    }

    /// `{root}/{series}/{stem}.extracting/`
    pub fn unpack_dir(&self, url: &ArchiveUrl) -> PathBuf {
        unpack_dir_for(&self.extract_dir(url))
    }

    /// `{root}/{series}/{stem}/{stem}.csv`
    pub fn record_path(&self, url: &ArchiveUrl) -> PathBuf {
        self.extract_dir(url).join(url.record_file_name())
    }

    pub fn state(&self, url: &ArchiveUrl) -> StagingState {
        if self.record_path(url).is_file() {
            StagingState::Extracted
        } else if self.archive_path(url).is_file() {
            StagingState::ArchivePresent
        } else {
            StagingState::Absent
        }
    }
}

/// Scratch directory an archive is unpacked into before being renamed to
/// `extract_dir`.
pub(crate) fn unpack_dir_for(extract_dir: &Path) -> PathBuf {
    let mut name = extract_dir.as_os_str().to_os_string();
    name.push(".extracting");
    PathBuf::from(name)
}
