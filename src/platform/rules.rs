//! Optional predicates ANDed onto the base platform rule.
//!
//! `DayRule` works per day and gets the whole frame so it can look back;
//! `SeriesGate` accepts or rejects an entire series. Callers can plug in their
//! own implementations next to the built-in ones.

use super::rolling::rolling_max;
use super::{BreakthroughConfig, FeatureFrame, RapidDeclineConfig};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Per-day predicate. Returns one flag per day; `false` excludes the day.
pub trait DayRule: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, frame: &FeatureFrame<'_>) -> Vec<bool>;
}

/// Whole-series predicate, applied uniformly to every day.
pub trait SeriesGate: Send + Sync {
    fn name(&self) -> &str;
    fn admits(&self, symbol: &str) -> bool;
}

// ── Breakthrough proximity ────────────────────────────────────────────────────

/// A breakout attempt is a day whose high clears the prior `lookback`-day high
/// by more than `tolerance`. Days within `cooldown` days after an attempt
/// (inclusive) are excluded, as are days without a full lookback.
#[derive(Debug, Clone)]
pub struct BreakthroughRule {
    lookback: usize,
    tolerance: f64,
    cooldown: usize,
}

impl BreakthroughRule {
    pub fn new(cfg: &BreakthroughConfig) -> Self {
        Self { lookback: cfg.lookback, tolerance: cfg.tolerance, cooldown: cfg.cooldown }
    }

    pub fn attempts(&self, highs: &[f64]) -> Vec<bool> {
        let prior_max = rolling_max(highs, self.lookback);
        (0..highs.len())
            .map(|j| {
                j >= self.lookback
                    && prior_max[j - 1].is_some_and(|m| highs[j] > m * (1.0 + self.tolerance))
            })
            .collect()
    }
}

impl DayRule for BreakthroughRule {
    fn name(&self) -> &str {
        "breakthrough"
    }

    fn evaluate(&self, frame: &FeatureFrame<'_>) -> Vec<bool> {
        let attempts = self.attempts(&frame.series.highs());
        let mut last_attempt: Option<usize> = None;
        attempts
            .iter()
            .enumerate()
            .map(|(i, &hit)| {
                if hit {
                    last_attempt = Some(i);
                }
                let cooling = last_attempt.is_some_and(|j| i - j <= self.cooldown);
                i >= self.lookback && !cooling
            })
            .collect()
    }
}

// ── Rapid decline ─────────────────────────────────────────────────────────────

/// Excludes days whose trailing `lookback` closes contain a peak-to-trough
/// drop of at least `max_drop`.
#[derive(Debug, Clone)]
pub struct RapidDeclineRule {
    lookback: usize,
    max_drop: f64,
}

impl RapidDeclineRule {
    pub fn new(cfg: &RapidDeclineConfig) -> Self {
        Self { lookback: cfg.lookback, max_drop: cfg.max_drop }
    }
}

fn max_drawdown(closes: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &c in closes {
        peak = peak.max(c);
        if peak > 0.0 {
            worst = worst.max((peak - c) / peak);
        }
    }
    worst
}

impl DayRule for RapidDeclineRule {
    fn name(&self) -> &str {
        "rapid_decline"
    }

    fn evaluate(&self, frame: &FeatureFrame<'_>) -> Vec<bool> {
        let closes = frame.series.closes();
        (0..closes.len())
            .map(|i| {
                i + 1 >= self.lookback
                    && max_drawdown(&closes[i + 1 - self.lookback..=i]) < self.max_drop
            })
            .collect()
    }
}

// ── Fundamental percentile gate ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PercentileRow {
    symbol: String,
    percentile: f64,
}

/// Financial-ratio percentile per symbol, loaded from a `symbol,percentile` CSV.
#[derive(Debug, Clone, Default)]
pub struct PercentileTable {
    values: HashMap<String, f64>,
}

impl PercentileTable {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open percentile table {:?}", path))?;

        let mut values = HashMap::new();
        for (i, row) in reader.deserialize::<PercentileRow>().enumerate() {
            let row = row.with_context(|| format!("Row {} in {:?}", i + 1, path))?;
            values.insert(row.symbol, row.percentile);
        }
        debug!("Loaded {} fundamental percentiles from {:?}", values.len(), path);
        Ok(Self { values })
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.values.get(symbol).copied()
    }

}

impl FromIterator<(String, f64)> for PercentileTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// Admits a symbol only when its percentile is known and `>= min_percentile`.
#[derive(Debug, Clone)]
pub struct FundamentalGate {
    table: PercentileTable,
    min_percentile: f64,
}

impl FundamentalGate {
    pub fn new(table: PercentileTable, min_percentile: f64) -> Self {
        Self { table, min_percentile }
    }
}

impl SeriesGate for FundamentalGate {
    fn name(&self) -> &str {
        "fundamental"
    }

    fn admits(&self, symbol: &str) -> bool {
        self.table.get(symbol).is_some_and(|p| p >= self.min_percentile)
    }
}
