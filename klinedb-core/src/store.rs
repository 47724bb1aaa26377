//! Destination store for kline rows.
//!
//! Rows are keyed on `(exchange, token, open_time)` and written with
//! insert-or-ignore semantics: the first write of a key wins and later loads of
//! the same key are no-ops. Concurrent writers rely on the database's own
//! locking, never on an application lock.

use crate::record::{KlineRecord, ParseError};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How long a connection waits for another writer's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS KLINES_SPOT (
    exchange                     TEXT    NOT NULL,
    token                        TEXT    NOT NULL,
    open_time                    INTEGER NOT NULL,
    open                         REAL    NOT NULL,
    high                         REAL    NOT NULL,
    low                          REAL    NOT NULL,
    close                        REAL    NOT NULL,
    volume                       REAL    NOT NULL,
    close_time                   INTEGER NOT NULL,
    quote_asset_volume           REAL    NOT NULL,
    number_of_trades             INTEGER NOT NULL,
    taker_buy_base_asset_volume  REAL    NOT NULL,
    taker_buy_quote_asset_volume REAL    NOT NULL,
    PRIMARY KEY (exchange, token, open_time)
);";

const UPSERT_SQL: &str = "
INSERT INTO KLINES_SPOT (
    exchange, token, open_time, open, high, low, close, volume, close_time,
    quote_asset_volume, number_of_trades, taker_buy_base_asset_volume,
    taker_buy_quote_asset_volume
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT (exchange, token, open_time) DO NOTHING";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row handed to [`KlineStore::upsert_file`] failed to parse.
    #[error("malformed record: {0}")]
    Row(#[from] ParseError),
}

/// Row counts for one upserted file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Rows read from the file and sent to the store.
    pub processed: usize,
    /// Rows that did not exist yet. Conflicting rows are left untouched.
    pub inserted: usize,
}

impl UpsertReport {
    /// Rows whose key was already present.
    pub fn skipped(&self) -> usize {
        self.processed - self.inserted
    }
}

/// Row count and time span stored for one `(exchange, token)` series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesSummary {
    pub exchange: String,
    pub token: String,
    pub rows: u64,
    pub first_open_time: i64,
    pub last_open_time: i64,
}

/// An upsert-capable kline table.
pub trait KlineStore: Send + Sync {
    /// Upsert every row produced by `rows` as one unit: either all rows of the
    /// file are committed or none are. A row error aborts and rolls back.
    fn upsert_file(
        &self,
        exchange: &str,
        token: &str,
        rows: &mut dyn Iterator<Item = Result<KlineRecord, ParseError>>,
    ) -> Result<UpsertReport, StoreError>;

    /// Count stored rows, optionally restricted to one exchange and/or token.
    fn count_rows(&self, exchange: Option<&str>, token: Option<&str>) -> Result<u64, StoreError>;
}

/// SQLite-backed store. Each call opens its own connection and drops it on return.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the table exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };

        let conn = store.connect()?;
        // WAL lets readers proceed while one worker holds the write lock.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(CREATE_TABLE_SQL)?;

        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Look up one stored row by key.
    pub fn find(
        &self,
        exchange: &str,
        token: &str,
        open_time: i64,
    ) -> Result<Option<KlineRecord>, StoreError> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT open_time, open, high, low, close, volume, close_time,
                        quote_asset_volume, number_of_trades,
                        taker_buy_base_asset_volume, taker_buy_quote_asset_volume
                 FROM KLINES_SPOT
                 WHERE exchange = ?1 AND token = ?2 AND open_time = ?3",
                params![exchange, token, open_time],
                |row| {
                    Ok(KlineRecord {
                        open_time: row.get(0)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                        close_time: row.get(6)?,
                        quote_asset_volume: row.get(7)?,
                        number_of_trades: row.get(8)?,
                        taker_buy_base_asset_volume: row.get(9)?,
                        taker_buy_quote_asset_volume: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Per-series row counts and open_time range, ordered by exchange then token.
    pub fn summary(&self) -> Result<Vec<SeriesSummary>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT exchange, token, COUNT(*), MIN(open_time), MAX(open_time)
             FROM KLINES_SPOT
             GROUP BY exchange, token
             ORDER BY exchange, token",
        )?;

        let series = stmt
            .query_map([], |row| {
                Ok(SeriesSummary {
                    exchange: row.get(0)?,
                    token: row.get(1)?,
                    rows: row.get::<_, i64>(2)? as u64,
                    first_open_time: row.get(3)?,
                    last_open_time: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(series)
    }
}

impl KlineStore for SqliteStore {
    fn upsert_file(
        &self,
        exchange: &str,
        token: &str,
        rows: &mut dyn Iterator<Item = Result<KlineRecord, ParseError>>,
    ) -> Result<UpsertReport, StoreError> {
        let mut conn = self.connect()?;
        // Take the write lock up front so the busy timeout applies, rather than
        // failing on a lock upgrade halfway through the file.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut report = UpsertReport::default();
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for row in rows {
                let r = row?;
                let changed = stmt.execute(params![
                    exchange,
                    token,
                    r.open_time,
                    r.open,
                    r.high,
                    r.low,
                    r.close,
                    r.volume,
                    r.close_time,
                    r.quote_asset_volume,
                    r.number_of_trades,
                    r.taker_buy_base_asset_volume,
                    r.taker_buy_quote_asset_volume,
                ])?;
                report.processed += 1;
                report.inserted += changed;
            }
        }

        tx.commit()?;
        Ok(report)
    }

    fn count_rows(&self, exchange: Option<&str>, token: Option<&str>) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM KLINES_SPOT
             WHERE (?1 IS NULL OR exchange = ?1) AND (?2 IS NULL OR token = ?2)",
            params![exchange, token],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
