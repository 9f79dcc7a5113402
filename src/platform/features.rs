use super::rolling::{mean, population_std, rolling_max, rolling_mean, rolling_min, rolling_sample_std};
use super::PlatformConfig;
use crate::models::OhlcvSeries;
use std::collections::BTreeMap;

/// Per-day derived columns for one series. Every column has one entry per
/// bar; `None` marks a value that cannot be computed yet.
#[derive(Debug, Clone)]
pub struct FeatureFrame<'a> {
    pub series: &'a OhlcvSeries,
    /// Moving average of close, keyed by period.
    pub ma: BTreeMap<usize, Vec<Option<f64>>>,
    pub rolling_high: Vec<Option<f64>>,
    pub rolling_low: Vec<Option<f64>>,
    pub box_range: Vec<Option<f64>>,
    pub ma_diff: Vec<Option<f64>>,
    pub returns: Vec<Option<f64>>,
    pub volatility: Vec<Option<f64>>,
    pub avg_volume: Vec<Option<f64>>,
    pub volume_ratio: Vec<Option<f64>>,
    /// Box range for each box-quality window (empty unless that family is on).
    pub box_range_at: BTreeMap<usize, Vec<Option<f64>>>,
}

impl FeatureFrame<'_> {
    pub fn len(&self) -> usize {
        self.series.len()
    }
}

/// Compute every rolling column for `series` in one pass per column.
pub fn extract<'a>(series: &'a OhlcvSeries, config: &PlatformConfig) -> FeatureFrame<'a> {
    let n = series.len();
    let w = config.window;
    let closes = series.closes();
    let highs = series.highs();
    let lows = series.lows();

    let ma: BTreeMap<usize, Vec<Option<f64>>> = config
        .ma_periods
        .iter()
        .map(|&p| (p, rolling_mean(&closes, p)))
        .collect();

    let (rolling_high, rolling_low, box_range) = box_columns(&highs, &lows, w);

    let ma_diff = (0..n)
        .map(|i| {
            let mas: Vec<f64> = ma.values().filter_map(|col| col[i]).collect();
            if mas.len() < 2 {
                return None;
            }
            let m = mean(&mas);
            if m == 0.0 {
                return None;
            }
            population_std(&mas).map(|sd| sd / m)
        })
        .collect();

    let returns: Vec<Option<f64>> = (0..n)
        .map(|i| {
            if i == 0 || closes[i - 1] == 0.0 {
                None
            } else {
                Some(closes[i] / closes[i - 1] - 1.0)
            }
        })
        .collect();

    // The W-day price window holds W-1 daily returns.
    let volatility = rolling_sample_std(&returns, w.saturating_sub(1));

    let avg_volume = rolling_mean(&series.volumes(), w);
    let volume_ratio = (0..n)
        .map(|i| {
            let current = avg_volume[i]?;
            let previous = avg_volume[i.checked_sub(w)?]?;
            (previous != 0.0).then(|| current / previous)
        })
        .collect();

    let box_range_at = if config.box_quality.enabled {
        config
            .box_quality
            .windows
            .iter()
            .map(|&qw| (qw, box_columns(&highs, &lows, qw).2))
            .collect()
    } else {
        BTreeMap::new()
    };

    FeatureFrame {
        series,
        ma,
        rolling_high,
        rolling_low,
        box_range,
        ma_diff,
        returns,
        volatility,
        avg_volume,
        volume_ratio,
        box_range_at,
    }
}

type Column = Vec<Option<f64>>;

fn box_columns(highs: &[f64], lows: &[f64], window: usize) -> (Column, Column, Column) {
    let rh = rolling_max(highs, window);
    let rl = rolling_min(lows, window);
    let br = rh
        .iter()
        .zip(&rl)
        .map(|(h, l)| match (h, l) {
            (Some(h), Some(l)) if *l != 0.0 => Some((h - l) / l),
            _ => None,
        })
        .collect();
    (rh, rl, br)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{flat_series, series_from_closes};

    #[test]
    fn test_flat_series_features() {
        let s = flat_series(200, 100.0, 1000);
        let f = extract(&s, &PlatformConfig::default());

        assert_eq!(f.len(), 200);
        assert!(f.box_range[..19].iter().all(Option::is_none));
        assert!(f.box_range[19..].iter().all(|v| *v == Some(0.0)));
        assert!(f.volatility[..19].iter().all(Option::is_none));
        assert!(f.volatility[19..].iter().all(|v| *v == Some(0.0)));
        assert!(f.ma_diff[19..].iter().all(|v| *v == Some(0.0)));
        assert!(f.volume_ratio[..39].iter().all(Option::is_none));
        assert!(f.volume_ratio[39..].iter().all(|v| *v == Some(1.0)));
    }

    #[test]
    fn test_ma_diff_needs_two_averages() {
        let s = flat_series(12, 10.0, 1);
        let f = extract(&s, &PlatformConfig::default());
        // Only ma5 is defined on days 4..=8.
        assert_eq!(f.ma[&5][4], Some(10.0));
        assert!(f.ma[&10][8].is_none());
        assert!(f.ma_diff[8].is_none());
        assert_eq!(f.ma_diff[9], Some(0.0));
    }

    #[test]
    fn test_box_range_value() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + (i % 2) as f64).collect();
        let s = series_from_closes(&closes, 0.0, 10);
        let f = extract(&s, &PlatformConfig::default());
        assert_eq!(f.rolling_high[24], Some(101.0));
        assert_eq!(f.rolling_low[24], Some(100.0));
        assert_eq!(f.box_range[24], Some(0.01));
    }

    #[test]
    fn test_zero_low_leaves_box_range_undefined() {
        let mut closes = vec![1.0; 30];
        closes[25] = 0.0;
        let s = series_from_closes(&closes, 0.0, 10);
        let f = extract(&s, &PlatformConfig::default());
        assert!(f.box_range[24].is_some());
        assert!(f.box_range[25].is_none());
        // A zero close makes the next return undefined, and every window over it.
        assert!(f.returns[26].is_none());
        assert!(f.volatility[26].is_none());
    }

    #[test]
    fn test_zero_volume_denominator() {
        let s = flat_series(60, 10.0, 0);
        let f = extract(&s, &PlatformConfig::default());
        assert_eq!(f.avg_volume[40], Some(0.0));
        assert!(f.volume_ratio.iter().all(Option::is_none));
    }
}
