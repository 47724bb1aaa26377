//! klinedb core: the stages of the daily kline ingest pipeline.
//!
//! - URL sequencing from a base template and a date range
//! - Staging layout whose files double as the resumability marker
//! - Fetching archives over HTTP (or any [`fetch::ArchiveSource`])
//! - Extracting the single record file from each archive
//! - Streaming CSV rows and upserting them, one transaction per file

pub mod extract;
pub mod fetch;
pub mod load;
pub mod record;
pub mod sequence;
pub mod staging;
pub mod store;

pub use extract::{extract_archive, ExtractError, Extractor};
pub use fetch::{ArchiveSource, FetchError, FetchOutcome, Fetcher, HttpSource, MemorySource};
pub use load::{LoadError, LoadReport, Loader};
pub use record::{KlineReader, KlineRecord, ParseError};
pub use sequence::{generate, token_from_base, ArchiveUrl, DateRange, InvalidDateError};
pub use staging::{StagingLayout, StagingState};
pub use store::{KlineStore, SeriesSummary, SqliteStore, StoreError, UpsertReport};
