//! Cached-series directory: one CSV per (symbol, range), named like
//! `sh.605080_2020-08-27-2025-08-26.csv`.

use crate::errors::ErrorKind;
use crate::models::{OhlcvBar, OhlcvSeries, ScanUnit};
use crate::storage::{SeriesStore, StoreSource};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cache file row. Extra columns are ignored; volume may be written as float.
#[derive(Debug, Deserialize)]
struct CsvBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl CsvBar {
    fn into_bar(self) -> Option<OhlcvBar> {
        if !self.volume.is_finite() || self.volume < 0.0 {
            return None;
        }
        Some(OhlcvBar {
            date: self.date,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume.round() as u64,
        })
    }
}

/// Parse `{symbol}_{YYYY-MM-DD}-{YYYY-MM-DD}.csv` into a unit.
pub fn unit_from_filename(path: &Path) -> Option<ScanUnit> {
    if path.extension()? != "csv" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (symbol, range) = stem.rsplit_once('_')?;
    if symbol.is_empty() || range.len() != 21 || range.as_bytes()[10] != b'-' {
        return None;
    }
    let start = NaiveDate::parse_from_str(&range[..10], "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(&range[11..], "%Y-%m-%d").ok()?;
    Some(ScanUnit::new(symbol, start, end))
}

#[derive(Debug, Clone)]
pub struct CsvCacheStore {
    dir: PathBuf,
}

impl CsvCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, unit: &ScanUnit) -> PathBuf {
        self.dir.join(format!("{}.csv", unit.key()))
    }

    /// Write a series in cache format; used to seed caches and in tests.
    pub fn write(&self, unit: &ScanUnit, series: &OhlcvSeries) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(unit);
        let mut writer = csv::Writer::from_path(&path)?;
        for bar in series.bars() {
            writer.serialize(bar)?;
        }
        writer.flush()?;
        Ok(path)
    }

    fn read(path: &Path) -> Result<Vec<OhlcvBar>, ErrorKind> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| ErrorKind::DataMalformed(format!("{:?}: {}", path, e)))?;

        let mut bars = Vec::new();
        for (i, row) in reader.deserialize::<CsvBar>().enumerate() {
            let row = row.map_err(|e| ErrorKind::DataMalformed(format!("{:?} row {}: {}", path, i + 1, e)))?;
            let bar = row
                .into_bar()
                .ok_or_else(|| ErrorKind::DataMalformed(format!("{:?} row {}: bad volume", path, i + 1)))?;
            bars.push(bar);
        }
        Ok(bars)
    }
}

impl SeriesStore for CsvCacheStore {
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<OhlcvSeries, ErrorKind> {
        let path = self.path_for(&ScanUnit::new(symbol, start, end));
        if !path.is_file() {
            return Err(ErrorKind::DataUnavailable(format!("no cached series at {:?}", path)));
        }
        debug!("Loading {} from {:?}", symbol, path);
        OhlcvSeries::new(Self::read(&path)?)
    }

    fn discover_units(&self) -> Result<Vec<ScanUnit>> {
        if !self.dir.exists() {
            info!("Cache directory {:?} does not exist", self.dir);
            return Ok(vec![]);
        }

        let mut units = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match unit_from_filename(&path) {
                Some(unit) => units.push(unit),
                None => debug!("Skipping {:?}: not a cached series name", path),
            }
        }
        units.sort();
        Ok(units)
    }

    fn source(&self) -> Option<StoreSource> {
        Some(StoreSource::CsvDir(self.dir.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{day, flat_series};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("platform-cache-{}-{}", tag, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_unit_from_filename() {
        let u = unit_from_filename(Path::new("cache/sh.605080_2020-08-27-2025-08-26.csv")).unwrap();
        assert_eq!(u.symbol, "sh.605080");
        assert_eq!(u.start_date, NaiveDate::from_ymd_opt(2020, 8, 27).unwrap());
        assert_eq!(u.end_date, NaiveDate::from_ymd_opt(2025, 8, 26).unwrap());

        assert!(unit_from_filename(Path::new("sh.605080_2020-08-27-2025-08-26.pkl")).is_none());
        assert!(unit_from_filename(Path::new("notes.csv")).is_none());
        assert!(unit_from_filename(Path::new("sh.605080_2020-08-27.csv")).is_none());
    }

    #[test]
    fn test_write_discover_fetch() {
        let dir = temp_dir("roundtrip");
        let store = CsvCacheStore::new(&dir);
        let unit = ScanUnit::new("sz.002988", day(0), day(24));
        let series = flat_series(25, 12.5, 3000);
        store.write(&unit, &series).unwrap();
        std::fs::write(dir.join("README.txt"), "ignored").unwrap();

        assert_eq!(store.discover_units().unwrap(), vec![unit.clone()]);
        let fetched = store.fetch(&unit.symbol, unit.start_date, unit.end_date).unwrap();
        assert_eq!(fetched, series);
        assert_eq!(store.source(), Some(StoreSource::CsvDir(dir.clone())));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fetch_missing_and_malformed() {
        let dir = temp_dir("errors");
        let store = CsvCacheStore::new(&dir);

        let missing = store.fetch("sh.600000", day(0), day(9));
        assert!(matches!(missing, Err(ErrorKind::DataUnavailable(_))));

        let unit = ScanUnit::new("sh.600001", day(0), day(1));
        std::fs::write(
            store.path_for(&unit),
            "date,open,high,low,close,volume\n2020-01-01,10,9,8,10,100\n",
        )
        .unwrap();
        let bad = store.fetch(&unit.symbol, unit.start_date, unit.end_date);
        assert!(matches!(bad, Err(ErrorKind::DataMalformed(_))));

        std::fs::write(store.path_for(&unit), "date,open\nnot-a-date,1\n").unwrap();
        let bad = store.fetch(&unit.symbol, unit.start_date, unit.end_date);
        assert!(matches!(bad, Err(ErrorKind::DataMalformed(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_float_volume_and_extra_columns() {
        let dir = temp_dir("lenient");
        let store = CsvCacheStore::new(&dir);
        let unit = ScanUnit::new("sh.600002", day(0), day(1));
        std::fs::write(
            store.path_for(&unit),
            "date,open,high,low,close,volume,amount\n2020-01-01,10,11,9,10.5,1200.0,12600\n2020-01-02,10.5,10.6,10.1,10.2,900,9180\n",
        )
        .unwrap();
        let s = store.fetch(&unit.symbol, unit.start_date, unit.end_date).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.bars()[0].volume, 1200);

        std::fs::remove_dir_all(&dir).ok();
    }
}
