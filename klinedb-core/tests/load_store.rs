//! Loader + SqliteStore: record files in, deduplicated rows out.

use klinedb_core::{LoadError, LoadReport, Loader, SqliteStore, KlineStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DAY: &str = "\
1704067200000,0.00000120,0.00000121,0.00000119,0.00000120,1500000.0,1704067259999,1.8,12,700000.0,0.84,0
1704067260000,0.00000120,0.00000122,0.00000120,0.00000121,900000.0,1704067319999,1.09,7,450000.0,0.54,0
1704067320000,0.00000121,0.00000121,0.00000118,0.00000119,2100000.0,1704067379999,2.5,19,1000000.0,1.19,0
";

fn setup() -> (tempfile::TempDir, Arc<SqliteStore>, Loader) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("klines.db")).unwrap());
    let loader = Loader::new(store.clone());
    (dir, store, loader)
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn loads_every_row_with_tags() {
    let (dir, store, loader) = setup();
    let file = write_file(dir.path(), "X-1m-2024-01-01.csv", DAY);

    let report = loader.load(&file, "Binance", "X").unwrap();

    assert_eq!(report, LoadReport { processed: 3, inserted: 3 });
    assert_eq!(store.count_rows(Some("Binance"), Some("X")).unwrap(), 3);
    let row = store.find("Binance", "X", 1_704_067_260_000).unwrap().unwrap();
    assert_eq!(row.number_of_trades, 7);
    assert_eq!(row.close_time, 1_704_067_319_999);
}

#[test]
fn reloading_is_a_no_op() {
    let (dir, store, loader) = setup();
    let file = write_file(dir.path(), "X-1m-2024-01-01.csv", DAY);

    loader.load(&file, "Binance", "X").unwrap();
    let again = loader.load(&file, "Binance", "X").unwrap();

    assert_eq!(again, LoadReport { processed: 3, inserted: 0 });
    assert_eq!(store.count_rows(None, None).unwrap(), 3);
}

#[test]
fn later_load_never_overwrites_stored_values() {
    let (dir, store, loader) = setup();
    let original = write_file(dir.path(), "a.csv", DAY);
    loader.load(&original, "Binance", "X").unwrap();
    let before = store.find("Binance", "X", 1_704_067_200_000).unwrap().unwrap();

    let altered = DAY.replacen("0.00000120,1500000.0", "9.99,1.0", 1);
    let altered = write_file(dir.path(), "b.csv", &altered);
    loader.load(&altered, "Binance", "X").unwrap();

    let after = store.find("Binance", "X", 1_704_067_200_000).unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(after.volume, 1_500_000.0);
}

#[test]
fn malformed_row_leaves_no_partial_file() {
    let (dir, store, loader) = setup();
    let broken = format!("{DAY}1704067380000,0.1,0.1\n");
    let file = write_file(dir.path(), "broken.csv", &broken);

    let err = loader.load(&file, "Binance", "X").unwrap_err();

    assert!(matches!(err, LoadError::Parse(_)));
    assert_eq!(store.count_rows(None, None).unwrap(), 0);
}

#[test]
fn missing_file_is_an_io_error() {
    let (dir, _store, loader) = setup();
    let err = loader
        .load(&dir.path().join("absent.csv"), "Binance", "X")
        .unwrap_err();
    assert!(matches!(err, LoadError::Io { .. }));
}

#[test]
fn concurrent_loads_of_same_rows_do_not_duplicate() {
    let (dir, store, loader) = setup();
    let file = write_file(dir.path(), "X-1m-2024-01-01.csv", DAY);
    let loader = Arc::new(loader);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let loader = loader.clone();
            let file = file.clone();
            std::thread::spawn(move || loader.load(&file, "Binance", "X").unwrap())
        })
        .collect();
    let inserted: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap().inserted)
        .sum();

    assert_eq!(inserted, 3);
    assert_eq!(store.count_rows(None, None).unwrap(), 3);
}
