//! Kline rows and the streaming reader for the provider's record files.
//!
//! Column order is fixed and there is no header:
//! `open_time, open, high, low, close, volume, close_time, quote_asset_volume,
//! number_of_trades, taker_buy_base_asset_volume, taker_buy_quote_asset_volume, ignore`.
//! The trailing `ignore` column is dropped. Some published files do start with a
//! header line; it is recognised by an `open_time` first field and skipped. Any
//! other first row is data and must parse.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Number of meaningful leading columns in a record file.
pub const KLINE_COLUMNS: usize = 11;

/// One OHLCV candlestick row.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineRecord {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
    pub quote_asset_volume: f64,
    pub number_of_trades: i64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: expected at least 11 fields, found {found}")]
    TooFewFields { line: u64, found: usize },

    #[error("line {line}: invalid {column} value '{value}'")]
    InvalidField {
        line: u64,
        column: &'static str,
        value: String,
    },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

const COLUMN_NAMES: [&str; KLINE_COLUMNS] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
    "quote_asset_volume",
    "number_of_trades",
    "taker_buy_base_asset_volume",
    "taker_buy_quote_asset_volume",
];

/// Row-at-a-time reader over a record file.
pub struct KlineReader<R> {
    inner: csv::Reader<R>,
    row: StringRecord,
    at_start: bool,
}

impl KlineReader<File> {
    pub fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> KlineReader<R> {
    pub fn new(reader: R) -> Self {
        let inner = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);
        Self {
            inner,
            row: StringRecord::new(),
            at_start: true,
        }
    }
}

impl<R: Read> Iterator for KlineReader<R> {
    type Item = Result<KlineRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.read_record(&mut self.row) {
                Ok(false) => return None,
                Err(e) => return Some(Err(e.into())),
                Ok(true) => {}
            }

            if std::mem::take(&mut self.at_start) && is_header(&self.row) {
                continue;
            }

            let line = self.row.position().map(|p| p.line()).unwrap_or(0);
            return Some(parse_row(&self.row, line));
        }
    }
}

fn is_header(row: &StringRecord) -> bool {
    row.get(0)
        .is_some_and(|f| f.eq_ignore_ascii_case(COLUMN_NAMES[0]))
}

fn parse_row(row: &StringRecord, line: u64) -> Result<KlineRecord, ParseError> {
    if row.len() < KLINE_COLUMNS {
        return Err(ParseError::TooFewFields {
            line,
            found: row.len(),
        });
    }

    Ok(KlineRecord {
        open_time: field(row, 0, line)?,
        open: field(row, 1, line)?,
        high: field(row, 2, line)?,
        low: field(row, 3, line)?,
        close: field(row, 4, line)?,
        volume: field(row, 5, line)?,
        close_time: field(row, 6, line)?,
        quote_asset_volume: field(row, 7, line)?,
        number_of_trades: field(row, 8, line)?,
        taker_buy_base_asset_volume: field(row, 9, line)?,
        taker_buy_quote_asset_volume: field(row, 10, line)?,
    })
}

fn field<T: FromStr>(row: &StringRecord, idx: usize, line: u64) -> Result<T, ParseError> {
    let raw = &row[idx];
    raw.parse().map_err(|_| ParseError::InvalidField {
        line,
        column: COLUMN_NAMES[idx],
        value: raw.to_string(),
    })
}
