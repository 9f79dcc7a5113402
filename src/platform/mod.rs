//! Platform (consolidation) detection.
//!
//! ## Pipeline
//!
//! `features::extract()` computes every rolling column for a series in a single
//! pass, then `PlatformClassifier` turns the columns into a 0/1 status per day:
//!   1. Base rule: box range, MA convergence, volatility and (optionally) volume
//!      shrinkage all under their thresholds.
//!   2. Optional rule families ANDed on top: box quality across several windows,
//!      breakthrough proximity, rapid decline, fundamental gate.
//!
//! The single-window rule is the multi-window design with one window and every
//! optional family switched off.

pub mod classifier;
pub mod features;
pub mod rolling;
pub mod rules;

pub use classifier::PlatformClassifier;
pub use features::{extract, FeatureFrame};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Thresholds and rule toggles for one classification run.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlatformConfig {
    #[serde(default = "default_ma_periods")]
    pub ma_periods: Vec<usize>,

    /// Primary window `W` for box range, volatility and volume averages.
    #[serde(default = "default_window")]
    pub window: usize,

    #[serde(default = "default_box_threshold")]
    pub box_threshold: f64,

    #[serde(default = "default_ma_diff_threshold")]
    pub ma_diff_threshold: f64,

    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,

    #[serde(default = "default_volume_factor")]
    pub volume_factor: f64,

    #[serde(default = "default_true")]
    pub use_volume_analysis: bool,

    #[serde(default)]
    pub box_quality: BoxQualityConfig,

    #[serde(default)]
    pub breakthrough: BreakthroughConfig,

    #[serde(default)]
    pub rapid_decline: RapidDeclineConfig,

    #[serde(default)]
    pub fundamental: FundamentalConfig,
}

/// Weighted box-range score over several windows; replaces the single
/// box-range check when enabled.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BoxQualityConfig {
    pub enabled: bool,
    pub windows: Vec<usize>,
    /// One weight per window. Equal weights when absent.
    pub weights: Option<Vec<f64>>,
    pub min_score: f64,
}

/// Excludes days shortly after a new-high breakout attempt.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakthroughConfig {
    pub enabled: bool,
    pub lookback: usize,
    pub tolerance: f64,
    pub cooldown: usize,
}

/// Excludes days inside a recent sharp drawdown.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RapidDeclineConfig {
    pub enabled: bool,
    pub lookback: usize,
    pub max_drop: f64,
}

/// Whole-series gate on a financial-ratio percentile.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FundamentalConfig {
    pub enabled: bool,
    pub min_percentile: f64,
    pub percentiles_path: Option<PathBuf>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_ma_periods() -> Vec<usize> {
    vec![5, 10, 20, 30, 60]
}
fn default_window() -> usize {
    20
}
fn default_box_threshold() -> f64 {
    0.05
}
fn default_ma_diff_threshold() -> f64 {
    0.01
}
fn default_volatility_threshold() -> f64 {
    0.02
}
fn default_volume_factor() -> f64 {
    0.7
}
fn default_true() -> bool {
    true
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            ma_periods: default_ma_periods(),
            window: default_window(),
            box_threshold: default_box_threshold(),
            ma_diff_threshold: default_ma_diff_threshold(),
            volatility_threshold: default_volatility_threshold(),
            volume_factor: default_volume_factor(),
            use_volume_analysis: true,
            box_quality: BoxQualityConfig::default(),
            breakthrough: BreakthroughConfig::default(),
            rapid_decline: RapidDeclineConfig::default(),
            fundamental: FundamentalConfig::default(),
        }
    }
}

impl Default for BoxQualityConfig {
    fn default() -> Self {
        Self { enabled: false, windows: vec![20, 30, 60], weights: None, min_score: 0.0 }
    }
}

impl Default for BreakthroughConfig {
    fn default() -> Self {
        Self { enabled: false, lookback: 60, tolerance: 0.0, cooldown: 5 }
    }
}

impl Default for RapidDeclineConfig {
    fn default() -> Self {
        Self { enabled: false, lookback: 20, max_drop: 0.15 }
    }
}

impl Default for FundamentalConfig {
    fn default() -> Self {
        Self { enabled: false, min_percentile: 50.0, percentiles_path: None }
    }
}

impl PlatformConfig {
    /// Shortest series that gets a windowed evaluation at all.
    pub fn min_required_len(&self) -> usize {
        let quality = if self.box_quality.enabled {
            self.box_quality.windows.iter().copied().max().unwrap_or(0)
        } else {
            0
        };
        self.window.max(quality)
    }

    /// Box-quality weights, one per window.
    pub fn quality_weights(&self) -> Vec<f64> {
        let n = self.box_quality.windows.len();
        match &self.box_quality.weights {
            Some(w) => w.clone(),
            None => vec![1.0; n],
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Volatility is a sample std over the W-1 returns in the window,
        // which needs at least two of them.
        if self.window < 3 {
            bail!("window must be >= 3 (volatility needs two returns), got {}", self.window);
        }
        if self.ma_periods.is_empty() || self.ma_periods.contains(&0) {
            bail!("ma_periods must be non-empty and positive: {:?}", self.ma_periods);
        }
        if self.box_threshold <= 0.0 {
            bail!("box_threshold must be > 0");
        }
        if self.box_quality.enabled {
            let q = &self.box_quality;
            if q.windows.is_empty() || q.windows.iter().any(|&w| w < 2) {
                bail!("box_quality.windows must be non-empty and >= 2: {:?}", q.windows);
            }
            if let Some(w) = &q.weights {
                if w.len() != q.windows.len() {
                    bail!("box_quality.weights has {} entries for {} windows", w.len(), q.windows.len());
                }
                if w.iter().any(|x| *x < 0.0) || w.iter().sum::<f64>() <= 0.0 {
                    bail!("box_quality.weights must be non-negative with a positive sum");
                }
            }
        }
        if self.breakthrough.enabled && self.breakthrough.lookback == 0 {
            bail!("breakthrough.lookback must be > 0");
        }
        if self.rapid_decline.enabled && self.rapid_decline.lookback < 2 {
            bail!("rapid_decline.lookback must be >= 2");
        }
        Ok(())
    }
}
