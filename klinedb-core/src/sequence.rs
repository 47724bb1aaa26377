//! URL sequencer: turns a base template and a date range into daily archive URLs.
//!
//! The provider publishes one archive per calendar day at `{base}{YYYY-MM-DD}.zip`.
//! Today's archive may not be published yet, so an open-ended range stops at
//! yesterday (UTC).

use chrono::{Duration, NaiveDate, Utc};
use thiserror::Error;

/// Date format used both for parsing user input and for formatting URLs.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Invalid date range input. Fatal to the whole run: nothing can proceed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidDateError {
    #[error("unparsable date '{input}' (expected YYYY-MM-DD)")]
    Unparsable { input: String },

    #[error("start date {start} is after end date {end}")]
    Reversed { start: NaiveDate, end: NaiveDate },
}

/// Inclusive calendar-day range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidDateError> {
        if start > end {
            return Err(InvalidDateError::Reversed { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a range from user input. A missing `end` means the day before `today`.
    pub fn parse(
        start: &str,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, InvalidDateError> {
        let start = parse_date(start)?;
        let end = match end {
            Some(s) => parse_date(s)?,
            None => today - Duration::days(1),
        };
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

fn parse_date(input: &str) -> Result<NaiveDate, InvalidDateError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| {
        InvalidDateError::Unparsable {
            input: input.to_string(),
        }
    })
}

/// One day's archive address plus the names derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveUrl {
    url: String,
    date: NaiveDate,
    file_name: String,
    series_dir: String,
}

impl ArchiveUrl {
    pub fn new(base: &str, date: NaiveDate) -> Self {
        let date_str = date.format(DATE_FORMAT);
        let (dir, prefix) = split_base(base);
        Self {
            url: format!("{base}{date_str}.zip"),
            date,
            file_name: format!("{prefix}{date_str}.zip"),
            series_dir: series_dir_of(dir),
        }
    }

    /// Full URL to GET.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Archive file name, e.g. `PEPEUSDC-1m-2024-09-01.zip`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Archive name without the `.zip` extension. Names the extraction
    /// directory and the record file inside it.
    pub fn stem(&self) -> &str {
        self.file_name
            .strip_suffix(".zip")
            .unwrap_or(&self.file_name)
    }

    /// Relative staging directory for this URL's series: host and path with the
    /// file prefix removed, e.g. `data.binance.vision/data/spot/daily/klines/X/1m`.
    pub fn series_dir(&self) -> &str {
        &self.series_dir
    }

    /// Expected name of the record file inside the archive.
    pub fn record_file_name(&self) -> String {
        format!("{}.csv", self.stem())
    }
}

/// Split a base URL (scheme stripped) into its directory part and file prefix.
fn split_base(base: &str) -> (&str, &str) {
    let rest = base.split_once("://").map_or(base, |(_, rest)| rest);
    rest.rsplit_once('/').unwrap_or(("", rest))
}

/// Turn a URL directory into a relative path that cannot escape the staging root.
fn series_dir_of(dir: &str) -> String {
    dir.split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .map(|seg| {
            seg.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl std::fmt::Display for ArchiveUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Generate the ordered daily URLs for `start..=end`, `end` defaulting to yesterday (UTC).
pub fn generate(
    base: &str,
    start: &str,
    end: Option<&str>,
) -> Result<Vec<ArchiveUrl>, InvalidDateError> {
    generate_with_today(base, start, end, Utc::now().date_naive())
}

/// Like [`generate`] with an explicit reference date for the default end.
pub fn generate_with_today(
    base: &str,
    start: &str,
    end: Option<&str>,
    today: NaiveDate,
) -> Result<Vec<ArchiveUrl>, InvalidDateError> {
    let range = DateRange::parse(start, end, today)?;
    Ok(urls_for_range(base, &range))
}

pub fn urls_for_range(base: &str, range: &DateRange) -> Vec<ArchiveUrl> {
    range.iter().map(|d| ArchiveUrl::new(base, d)).collect()
}

/// Instrument symbol encoded in a base URL: the last path segment up to its first `-`.
///
/// `.../klines/PEPEUSDC/1m/PEPEUSDC-1m-` yields `PEPEUSDC`.
pub fn token_from_base(base: &str) -> Option<&str> {
    let last = base.rsplit('/').next()?;
    let token = last.split('-').next()?;
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://data.binance.vision/data/spot/daily/klines/X/1m/X-1m-";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn three_day_range_yields_three_urls() {
        let urls = generate(BASE, "2024-01-01", Some("2024-01-03")).unwrap();
        assert_eq!(urls.len(), 3);
        assert!(urls[0].as_str().ends_with("X-1m-2024-01-01.zip"));
        assert!(urls[1].as_str().ends_with("X-1m-2024-01-02.zip"));
        assert!(urls[2].as_str().ends_with("X-1m-2024-01-03.zip"));
    }

    #[test]
    fn single_day_range() {
        let urls = generate(BASE, "2024-02-29", Some("2024-02-29")).unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].date(), d(2024, 2, 29));
    }

    #[test]
    fn range_crosses_month_and_year() {
        let urls = generate(BASE, "2023-12-30", Some("2024-01-02")).unwrap();
        let dates: Vec<_> = urls.iter().map(|u| u.date()).collect();
        assert_eq!(
            dates,
            vec![d(2023, 12, 30), d(2023, 12, 31), d(2024, 1, 1), d(2024, 1, 2)]
        );
    }

    #[test]
    fn missing_end_defaults_to_yesterday() {
        let urls = generate_with_today(BASE, "2024-03-01", None, d(2024, 3, 5)).unwrap();
        assert_eq!(urls.len(), 4);
        assert_eq!(urls.last().unwrap().date(), d(2024, 3, 4));
    }

    #[test]
    fn start_today_without_end_is_reversed() {
        let err = generate_with_today(BASE, "2024-03-05", None, d(2024, 3, 5)).unwrap_err();
        assert_eq!(
            err,
            InvalidDateError::Reversed {
                start: d(2024, 3, 5),
                end: d(2024, 3, 4),
            }
        );
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = generate(BASE, "2024-01-03", Some("2024-01-01")).unwrap_err();
        assert!(matches!(err, InvalidDateError::Reversed { .. }));
    }

    #[test]
    fn malformed_dates_are_rejected() {
        for bad in ["2024-13-01", "01/02/2024", "", "2024-02-30"] {
            let err = generate(BASE, bad, Some("2024-12-31")).unwrap_err();
            assert!(matches!(err, InvalidDateError::Unparsable { .. }), "{bad}");
        }
        let err = generate(BASE, "2024-01-01", Some("soon")).unwrap_err();
        assert_eq!(
            err,
            InvalidDateError::Unparsable {
                input: "soon".into()
            }
        );
    }

    #[test]
    fn archive_url_derives_local_names() {
        let url = ArchiveUrl::new(BASE, d(2024, 9, 1));
        assert_eq!(url.file_name(), "X-1m-2024-09-01.zip");
        assert_eq!(url.stem(), "X-1m-2024-09-01");
        assert_eq!(url.record_file_name(), "X-1m-2024-09-01.csv");
        assert_eq!(url.to_string(), format!("{BASE}2024-09-01.zip"));
        assert_eq!(
            url.series_dir(),
            "data.binance.vision/data/spot/daily/klines/X/1m"
        );
    }

    #[test]
    fn series_dir_stays_inside_staging_root() {
        let url = ArchiveUrl::new("http://127.0.0.1:8080/a/../b/./c d/X-1m-", d(2024, 1, 1));
        assert_eq!(url.series_dir(), "127.0.0.1_8080/a/b/c_d");
        assert_eq!(url.file_name(), "X-1m-2024-01-01.zip");

        let bare = ArchiveUrl::new("X-1m-", d(2024, 1, 1));
        assert_eq!(bare.series_dir(), "");
        assert_eq!(bare.file_name(), "X-1m-2024-01-01.zip");
    }

    #[test]
    fn token_is_parsed_from_base() {
        assert_eq!(token_from_base(BASE), Some("X"));
        assert_eq!(
            token_from_base(
                "https://data.binance.vision/data/spot/daily/klines/PEPEUSDC/1m/PEPEUSDC-1m-"
            ),
            Some("PEPEUSDC")
        );
        assert_eq!(token_from_base("https://example.com/"), None);
    }
}
