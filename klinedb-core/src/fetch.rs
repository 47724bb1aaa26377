//! Fetcher: downloads one day's archive into the staging area.
//!
//! The existence of the extracted record file is the idempotence marker: if it
//! is already on disk the URL is skipped without touching the network. Bodies
//! are streamed to `{stem}.zip.part` and renamed into place only once fully
//! written, so a crash mid-download never leaves something that looks like a
//! complete archive.

use crate::sequence::ArchiveUrl;
use crate::staging::{StagingLayout, StagingState};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default per-request timeout for [`HttpSource`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered, but not with a 2xx.
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Connection, timeout or body read failure.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("staging I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Where archives come from.
///
/// Implementations stream the body into `sink` and must fail on any non-2xx
/// response. The staging logic lives in [`Fetcher`]; sources know nothing about it.
pub trait ArchiveSource: Send + Sync {
    fn name(&self) -> &str;

    /// Stream the body at `url` into `sink`, returning the number of bytes written.
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError>;
}

/// HTTP archive source over a blocking `reqwest` client.
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("klinedb/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxy settings, TLS roots, ...).
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl ArchiveSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let mut resp = self.client.get(url).send().map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.copy_to(sink).map_err(transport)
    }
}

/// In-memory archive source keyed by URL. Unknown URLs answer 404.
///
/// Counts every request, which makes "second run fetches nothing" observable.
#[derive(Default)]
pub struct MemorySource {
    bodies: HashMap<String, Vec<u8>>,
    statuses: HashMap<String, u16>,
    requests: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with a 200 for `url`.
    pub fn with_archive(mut self, url: impl Into<String>, body: Vec<u8>) -> Self {
        self.bodies.insert(url.into(), body);
        self
    }

    /// Answer `url` with the given status and no body.
    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        self.statuses.insert(url.into(), status);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ArchiveSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(&status) = self.statuses.get(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = self.bodies.get(url).ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        sink.write_all(body)
            .map_err(|e| FetchError::io(url, e))?;
        Ok(body.len() as u64)
    }
}

/// What [`Fetcher::fetch`] found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Record file already extracted; nothing to do. Holds the record path.
    AlreadyExtracted(PathBuf),
    /// A complete archive from an earlier run is waiting to be extracted.
    ArchivePending(PathBuf),
    /// Archive freshly downloaded to the staging path.
    Downloaded { path: PathBuf, bytes: u64 },
}

impl FetchOutcome {
    /// Whether the network was used.
    pub fn was_downloaded(&self) -> bool {
        matches!(self, FetchOutcome::Downloaded { .. })
    }
}

pub struct Fetcher {
    source: Arc<dyn ArchiveSource>,
    layout: StagingLayout,
}

impl Fetcher {
    pub fn new(source: Arc<dyn ArchiveSource>, layout: StagingLayout) -> Self {
        Self { source, layout }
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    pub fn fetch(&self, url: &ArchiveUrl) -> Result<FetchOutcome, FetchError> {
        match self.layout.state(url) {
            StagingState::Extracted => {
                info!(url = %url, "skipping, already extracted");
                // Interrupted between publishing the record and deleting the archive.
                let leftover = self.layout.archive_path(url);
                if leftover.is_file() {
                    debug!(path = %leftover.display(), "removing leftover archive");
                    fs::remove_file(&leftover).map_err(|e| FetchError::io(&leftover, e))?;
                }
                return Ok(FetchOutcome::AlreadyExtracted(self.layout.record_path(url)));
            }
            StagingState::ArchivePresent => {
                info!(url = %url, "archive already downloaded, resuming at extract");
                return Ok(FetchOutcome::ArchivePending(self.layout.archive_path(url)));
            }
            StagingState::Absent => {}
        }

        self.layout
            .ensure_series_dir(url)
            .map_err(|e| FetchError::io(self.layout.series_dir(url), e))?;

        let part = self.layout.partial_path(url);
        let archive = self.layout.archive_path(url);

        info!(url = %url, source = self.source.name(), "downloading");
        let bytes = match self.download_to(url, &part) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };

        fs::rename(&part, &archive).map_err(|e| {
            let _ = fs::remove_file(&part);
            FetchError::io(&archive, e)
        })?;

        debug!(url = %url, bytes, path = %archive.display(), "download complete");
        Ok(FetchOutcome::Downloaded {
            path: archive,
            bytes,
        })
    }

    fn download_to(&self, url: &ArchiveUrl, part: &std::path::Path) -> Result<u64, FetchError> {
        let file = File::create(part).map_err(|e| FetchError::io(part, e))?;
        let mut writer = BufWriter::new(file);
        let bytes = self.source.download(url.as_str(), &mut writer)?;
        writer.flush().map_err(|e| FetchError::io(part, e))?;
        Ok(bytes)
    }
}
