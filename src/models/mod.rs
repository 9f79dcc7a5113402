use crate::errors::ErrorKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Daily bar ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl OhlcvBar {
    fn check(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(format!("{}: negative or non-finite price", self.date));
        }
        if self.high < self.open.max(self.close).max(self.low) {
            return Err(format!("{}: high {} below open/close/low", self.date, self.high));
        }
        if self.low > self.open.min(self.close).min(self.high) {
            return Err(format!("{}: low {} above open/close/high", self.date, self.low));
        }
        Ok(())
    }
}

// ── Series ────────────────────────────────────────────────────────────────────

/// An ordered, validated daily OHLCV series. Immutable once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OhlcvSeries {
    bars: Vec<OhlcvBar>,
}

impl OhlcvSeries {
    /// Validate bar invariants and strict date ordering.
    pub fn new(bars: Vec<OhlcvBar>) -> Result<Self, ErrorKind> {
        for (i, bar) in bars.iter().enumerate() {
            bar.check().map_err(ErrorKind::DataMalformed)?;
            if i > 0 && bars[i - 1].date >= bar.date {
                return Err(ErrorKind::DataMalformed(format!(
                    "dates not strictly increasing at {} (after {})",
                    bar.date,
                    bars[i - 1].date
                )));
            }
        }
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[OhlcvBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume as f64).collect()
    }
}

// ── Work unit ─────────────────────────────────────────────────────────────────

/// One (symbol, date range) combination to scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanUnit {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ScanUnit {
    pub fn new(symbol: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self { symbol: symbol.into(), start_date, end_date }
    }

    /// Cache key used for file names: `sh.600000_2020-08-27-2025-08-26`.
    pub fn key(&self) -> String {
        format!("{}_{}-{}", self.symbol, self.start_date, self.end_date)
    }
}

impl fmt::Display for ScanUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} → {}]", self.symbol, self.start_date, self.end_date)
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub status: u8,
}

/// Classification summary for one scan unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformResult {
    #[serde(rename = "code")]
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: usize,
    pub platform_days: usize,
    pub platform_percentage: f64,
    pub data: Vec<DayRecord>,
}

/// A contiguous run of platform days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: usize,
}

impl PlatformResult {
    /// Pair each bar with its status. `statuses` must be 1:1 with the series.
    pub fn from_statuses(unit: &ScanUnit, series: &OhlcvSeries, statuses: &[u8]) -> Self {
        let data: Vec<DayRecord> = series
            .bars()
            .iter()
            .zip(statuses)
            .map(|(b, &status)| DayRecord {
                date: b.date,
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
                status,
            })
            .collect();

        let total_days = series.len();
        let platform_days = statuses.iter().filter(|&&s| s == 1).count();

        Self {
            symbol: unit.symbol.clone(),
            start_date: unit.start_date,
            end_date: unit.end_date,
            total_days,
            platform_days,
            platform_percentage: platform_percentage(platform_days, total_days),
            data,
        }
    }

    pub fn unit(&self) -> ScanUnit {
        ScanUnit::new(self.symbol.clone(), self.start_date, self.end_date)
    }

    pub fn statuses(&self) -> Vec<u8> {
        self.data.iter().map(|d| d.status).collect()
    }

    /// Contiguous platform spans in date order.
    pub fn periods(&self) -> Vec<PlatformPeriod> {
        let mut periods = Vec::new();
        let mut current: Option<PlatformPeriod> = None;

        for day in &self.data {
            if day.status == 1 {
                match current.as_mut() {
                    Some(p) => {
                        p.end = day.date;
                        p.days += 1;
                    }
                    None => current = Some(PlatformPeriod { start: day.date, end: day.date, days: 1 }),
                }
            } else if let Some(p) = current.take() {
                periods.push(p);
            }
        }
        periods.extend(current);
        periods
    }
}

/// `round(100 * platform / total, 2)`, or 0 for an empty series.
pub fn platform_percentage(platform_days: usize, total_days: usize) -> f64 {
    if total_days == 0 {
        return 0.0;
    }
    let pct = 100.0 * platform_days as f64 / total_days as f64;
    (pct * 100.0).round() / 100.0
}

// ── Outcome ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Success(PlatformResult),
    Failure { unit: ScanUnit, error: ErrorKind },
}

impl ScanOutcome {
    pub fn failure(unit: &ScanUnit, error: ErrorKind) -> Self {
        Self::Failure { unit: unit.clone(), error }
    }

    /// The unit this outcome belongs to, whichever way it went.
    pub fn unit(&self) -> ScanUnit {
        match self {
            Self::Success(r) => r.unit(),
            Self::Failure { unit, .. } => unit.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn has_platform(&self) -> bool {
        matches!(self, Self::Success(r) if r.platform_days > 0)
    }

    pub fn result(&self) -> Option<&PlatformResult> {
        match self {
            Self::Success(r) => Some(r),
            Self::Failure { .. } => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(i as i64)
    }

    /// `n` bars with every price equal to `price` and constant volume.
    pub fn flat_series(n: usize, price: f64, volume: u64) -> OhlcvSeries {
        let bars = (0..n)
            .map(|i| OhlcvBar { date: day(i), open: price, high: price, low: price, close: price, volume })
            .collect();
        OhlcvSeries::new(bars).unwrap()
    }

    /// Build a series from closes; high/low wrap the close by `spread`.
    pub fn series_from_closes(closes: &[f64], spread: f64, volume: u64) -> OhlcvSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| OhlcvBar {
                date: day(i),
                open: c,
                high: c * (1.0 + spread),
                low: c * (1.0 - spread),
                close: c,
                volume,
            })
            .collect();
        OhlcvSeries::new(bars).unwrap()
    }

    pub fn unit(symbol: &str) -> ScanUnit {
        ScanUnit::new(symbol, day(0), day(199))
    }
}
