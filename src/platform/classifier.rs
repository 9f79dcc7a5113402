use super::features::{extract, FeatureFrame};
use super::rules::{BreakthroughRule, DayRule, FundamentalGate, PercentileTable, RapidDeclineRule, SeriesGate};
use super::PlatformConfig;
use crate::models::{OhlcvSeries, PlatformResult, ScanUnit};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Turns feature columns into per-day platform flags.
///
/// Built once per batch and shared read-only between tasks.
pub struct PlatformClassifier {
    config: PlatformConfig,
    rules: Vec<Arc<dyn DayRule>>,
    gates: Vec<Arc<dyn SeriesGate>>,
    /// Set once a caller plugs in a predicate that `config` cannot rebuild.
    custom: bool,
}

impl PlatformClassifier {
    /// Validate `config` and build the rule families it enables.
    pub fn new(config: PlatformConfig) -> Result<Self> {
        config.validate().context("Invalid platform config")?;

        let mut rules: Vec<Arc<dyn DayRule>> = Vec::new();
        let mut gates: Vec<Arc<dyn SeriesGate>> = Vec::new();

        if config.breakthrough.enabled {
            rules.push(Arc::new(BreakthroughRule::new(&config.breakthrough)));
        }
        if config.rapid_decline.enabled {
            rules.push(Arc::new(RapidDeclineRule::new(&config.rapid_decline)));
        }
        if config.fundamental.enabled {
            let path = config
                .fundamental
                .percentiles_path
                .as_deref()
                .context("fundamental filter enabled without percentiles_path")?;
            let table = PercentileTable::load(path)?;
            gates.push(Arc::new(FundamentalGate::new(table, config.fundamental.min_percentile)));
        }

        Ok(Self { config, rules, gates, custom: false })
    }

    pub fn with_rule(mut self, rule: Arc<dyn DayRule>) -> Self {
        self.rules.push(rule);
        self.custom = true;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn SeriesGate>) -> Self {
        self.gates.push(gate);
        self.custom = true;
        self
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// True when the classifier can be rebuilt from its config alone, e.g. in
    /// a worker process.
    pub fn is_portable(&self) -> bool {
        !self.custom
    }

    /// 0/1 per day. Series shorter than the required window are all zero.
    pub fn classify(&self, frame: &FeatureFrame<'_>, symbol: &str) -> Vec<u8> {
        let n = frame.len();
        if n < self.config.min_required_len() {
            return vec![0; n];
        }
        if let Some(gate) = self.gates.iter().find(|g| !g.admits(symbol)) {
            debug!("{}: rejected by {} gate", symbol, gate.name());
            return vec![0; n];
        }

        let masks: Vec<Vec<bool>> = self.rules.iter().map(|r| r.evaluate(frame)).collect();

        (0..n)
            .map(|i| {
                let ok = self.base_rule(frame, i) && masks.iter().all(|m| m[i]);
                u8::from(ok)
            })
            .collect()
    }

    /// Extract, classify and aggregate one unit.
    pub fn summarize(&self, unit: &ScanUnit, series: &OhlcvSeries) -> PlatformResult {
        let frame = extract(series, &self.config);
        let statuses = self.classify(&frame, &unit.symbol);
        PlatformResult::from_statuses(unit, series, &statuses)
    }

    fn base_rule(&self, frame: &FeatureFrame<'_>, i: usize) -> bool {
        let cfg = &self.config;

        let box_ok = if cfg.box_quality.enabled {
            self.box_quality_ok(frame, i)
        } else {
            frame.box_range[i].is_some_and(|b| b <= cfg.box_threshold)
        };

        let volume_ok = !cfg.use_volume_analysis
            || frame.volume_ratio[i].is_some_and(|v| v <= cfg.volume_factor);

        box_ok
            && frame.ma_diff[i].is_some_and(|d| d <= cfg.ma_diff_threshold)
            && frame.volatility[i].is_some_and(|v| v <= cfg.volatility_threshold)
            && volume_ok
    }

    /// Weighted mean of `1 - box_range_w / box_threshold` across windows.
    fn box_quality_ok(&self, frame: &FeatureFrame<'_>, i: usize) -> bool {
        let cfg = &self.config;
        let weights = cfg.quality_weights();
        let mut score = 0.0;
        let mut total_weight = 0.0;

        for (w, weight) in cfg.box_quality.windows.iter().zip(&weights) {
            let Some(br) = frame.box_range_at.get(w).and_then(|col| col[i]) else {
                return false;
            };
            score += weight * (1.0 - br / cfg.box_threshold);
            total_weight += weight;
        }

        total_weight > 0.0 && score / total_weight >= cfg.box_quality.min_score
    }
}

impl std::fmt::Debug for PlatformClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformClassifier")
            .field("config", &self.config)
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("gates", &self.gates.iter().map(|g| g.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{day, flat_series, series_from_closes, unit};
    use crate::models::{OhlcvBar, OhlcvSeries};

    fn no_volume() -> PlatformConfig {
        PlatformConfig { use_volume_analysis: false, ..PlatformConfig::default() }
    }

    fn classifier(config: PlatformConfig) -> PlatformClassifier {
        PlatformClassifier::new(config).unwrap()
    }

    /// Deterministic wobbling series: mostly tight, with a few wider stretches.
    fn wobbly_series(n: usize) -> OhlcvSeries {
        let mut seed: u64 = 42;
        let mut price = 50.0;
        let bars = (0..n)
            .map(|i| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let noise = ((seed >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
                let amp = if (i / 40) % 2 == 0 { 0.004 } else { 0.03 };
                price *= 1.0 + noise * amp;
                let volume = 1000 + ((seed >> 20) % 800);
                OhlcvBar {
                    date: day(i),
                    open: price,
                    high: price * 1.005,
                    low: price * 0.995,
                    close: price,
                    volume,
                }
            })
            .collect();
        OhlcvSeries::new(bars).unwrap()
    }

    fn platform_days(statuses: &[u8]) -> Vec<usize> {
        statuses.iter().enumerate().filter(|(_, s)| **s == 1).map(|(i, _)| i).collect()
    }

    #[test]
    fn test_flat_series_fails_volume_rule() {
        let s = flat_series(200, 100.0, 1000);
        let r = classifier(PlatformConfig::default()).summarize(&unit("sh.600000"), &s);
        assert_eq!(r.total_days, 200);
        assert_eq!(r.platform_days, 0);
        assert_eq!(r.platform_percentage, 0.0);
    }

    #[test]
    fn test_flat_series_without_volume_rule() {
        let s = flat_series(200, 100.0, 1000);
        let r = classifier(no_volume()).summarize(&unit("sh.600000"), &s);
        let statuses = r.statuses();
        assert!(statuses[..19].iter().all(|s| *s == 0));
        assert!(statuses[19..].iter().all(|s| *s == 1));
        assert_eq!(r.platform_days, 181);
        assert_eq!(r.platform_percentage, 90.5);
    }

    #[test]
    fn test_volume_spike_only_affects_its_windows() {
        let mut bars = flat_series(200, 100.0, 1000).bars().to_vec();
        bars[50].volume = 10_000;
        let s = OhlcvSeries::new(bars).unwrap();
        let cfg = PlatformConfig { volume_factor: 1.0, ..PlatformConfig::default() };
        let statuses = classifier(cfg).summarize(&unit("sh.600000"), &s).statuses();

        for (i, status) in statuses.iter().enumerate() {
            let expected = u8::from(i >= 39 && !(50..70).contains(&i));
            assert_eq!(*status, expected, "day {i}");
        }
    }

    #[test]
    fn test_short_series_is_all_zero() {
        let s = flat_series(19, 100.0, 1000);
        let r = classifier(no_volume()).summarize(&unit("sh.600000"), &s);
        assert_eq!(r.statuses(), vec![0; 19]);
        assert_eq!(r.platform_days, 0);

        let mut cfg = no_volume();
        cfg.box_quality.enabled = true;
        let s = flat_series(59, 100.0, 1000);
        let r = classifier(cfg.clone()).summarize(&unit("sh.600000"), &s);
        assert_eq!(r.platform_days, 0);

        let s = flat_series(60, 100.0, 1000);
        let r = classifier(cfg).summarize(&unit("sh.600000"), &s);
        assert_eq!(platform_days(&r.statuses()), vec![59]);
    }

    #[test]
    fn test_empty_series() {
        let s = OhlcvSeries::new(vec![]).unwrap();
        let r = classifier(PlatformConfig::default()).summarize(&unit("sh.600000"), &s);
        assert_eq!(r.total_days, 0);
        assert_eq!(r.platform_percentage, 0.0);
        assert!(r.data.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let s = wobbly_series(300);
        let c = classifier(no_volume());
        let a = c.summarize(&unit("sz.000001"), &s);
        let b = c.summarize(&unit("sz.000001"), &s);
        assert_eq!(a, b);
    }

    #[test]
    fn test_undefined_feature_means_not_platform() {
        let s = wobbly_series(300);
        let cfg = PlatformConfig::default();
        let frame = extract(&s, &cfg);
        let statuses = classifier(cfg).classify(&frame, "sz.000001");
        for (i, status) in statuses.iter().enumerate() {
            let undefined = frame.box_range[i].is_none()
                || frame.ma_diff[i].is_none()
                || frame.volatility[i].is_none()
                || frame.volume_ratio[i].is_none();
            if undefined {
                assert_eq!(*status, 0, "day {i}");
            }
        }
    }

    #[test]
    fn test_loosening_thresholds_is_monotonic() {
        let s = wobbly_series(400);
        let base = PlatformConfig {
            box_threshold: 0.03,
            ma_diff_threshold: 0.004,
            volatility_threshold: 0.002,
            volume_factor: 1.0,
            ..PlatformConfig::default()
        };
        let baseline = platform_days(&classifier(base.clone()).summarize(&unit("x"), &s).statuses());

        let loosened = [
            PlatformConfig { box_threshold: 0.08, ..base.clone() },
            PlatformConfig { ma_diff_threshold: 0.02, ..base.clone() },
            PlatformConfig { volatility_threshold: 0.03, ..base.clone() },
            PlatformConfig { volume_factor: 2.0, ..base.clone() },
        ];
        for cfg in loosened {
            let days = platform_days(&classifier(cfg.clone()).summarize(&unit("x"), &s).statuses());
            assert!(baseline.iter().all(|d| days.contains(d)), "lost days with {cfg:?}");
        }
    }

    #[test]
    fn test_single_window_quality_matches_base_rule() {
        let s = wobbly_series(300);
        let base = classifier(no_volume()).summarize(&unit("x"), &s);

        let mut cfg = no_volume();
        cfg.box_quality.enabled = true;
        cfg.box_quality.windows = vec![cfg.window];
        cfg.box_quality.min_score = 0.0;
        let quality = classifier(cfg).summarize(&unit("x"), &s);

        assert_eq!(base.statuses(), quality.statuses());
    }

    #[test]
    fn test_quality_score_threshold() {
        // Alternating 100/100.1 closes: box range 0.001 on every window.
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i % 2) as f64 * 0.1).collect();
        let s = series_from_closes(&closes, 0.0, 1000);
        let mut cfg = PlatformConfig { use_volume_analysis: false, ma_diff_threshold: 1.0, volatility_threshold: 1.0, ..PlatformConfig::default() };
        cfg.box_quality.enabled = true;
        cfg.box_quality.windows = vec![20, 30];
        cfg.box_quality.weights = Some(vec![2.0, 1.0]);

        // box_range = 0.001, score = 1 - 0.001/0.05 = 0.98
        cfg.box_quality.min_score = 0.95;
        assert_eq!(classifier(cfg.clone()).summarize(&unit("x"), &s).platform_days, 51);
        cfg.box_quality.min_score = 0.99;
        assert_eq!(classifier(cfg).summarize(&unit("x"), &s).platform_days, 0);
    }

    #[test]
    fn test_fundamental_gate_zeroes_series() {
        let s = flat_series(100, 100.0, 1000);
        let table: PercentileTable = [("good".to_string(), 90.0)].into_iter().collect();
        let c = classifier(no_volume()).with_gate(Arc::new(FundamentalGate::new(table, 50.0)));
        assert!(!c.is_portable());

        assert_eq!(c.summarize(&unit("good"), &s).platform_days, 81);
        assert_eq!(c.summarize(&unit("unknown"), &s).platform_days, 0);
    }

    #[test]
    fn test_fundamental_requires_table_path() {
        let mut cfg = PlatformConfig::default();
        cfg.fundamental.enabled = true;
        assert!(PlatformClassifier::new(cfg).is_err());
    }

    struct OddDaysOnly;

    impl DayRule for OddDaysOnly {
        fn name(&self) -> &str {
            "odd_days"
        }
        fn evaluate(&self, frame: &FeatureFrame<'_>) -> Vec<bool> {
            (0..frame.len()).map(|i| i % 2 == 1).collect()
        }
    }

    #[test]
    fn test_custom_rule_is_anded() {
        let s = flat_series(40, 100.0, 1000);
        let c = classifier(no_volume()).with_rule(Arc::new(OddDaysOnly));
        let days = platform_days(&c.summarize(&unit("x"), &s).statuses());
        assert_eq!(days, (19..40).filter(|i| i % 2 == 1).collect::<Vec<_>>());
    }

    #[test]
    fn test_rapid_decline_family_excludes_days() {
        // 100 for 100 days, then a 2% step down to 98: tight enough for the
        // base rule, deep enough for a 1% drawdown limit.
        let closes: Vec<f64> = (0..200).map(|i| if i < 100 { 100.0 } else { 98.0 }).collect();
        let s = series_from_closes(&closes, 0.0, 1000);

        let base = classifier(no_volume()).summarize(&unit("x"), &s).statuses();
        assert!((100..=118).all(|i| base[i] == 1));

        let mut cfg = no_volume();
        cfg.rapid_decline.enabled = true;
        cfg.rapid_decline.lookback = 20;
        cfg.rapid_decline.max_drop = 0.01;
        let c = classifier(cfg);
        assert!(c.is_portable());
        let with_rule = c.summarize(&unit("x"), &s).statuses();

        // Excluded exactly while the 20-day lookback still spans the step.
        let mut expected = base.clone();
        expected[100..=118].fill(0);
        assert_eq!(with_rule, expected);

        let flat = flat_series(100, 100.0, 1000);
        assert_eq!(c.summarize(&unit("x"), &flat).platform_days, 81);
    }

    #[test]
    fn test_breakthrough_family_excludes_attempt_and_cooldown() {
        let mut bars = flat_series(200, 100.0, 1000).bars().to_vec();
        bars[120].high = 101.0;
        let s = OhlcvSeries::new(bars).unwrap();

        let base = classifier(no_volume()).summarize(&unit("x"), &s).statuses();
        assert_eq!(platform_days(&base), (19..200).collect::<Vec<_>>());

        let mut cfg = no_volume();
        cfg.breakthrough.enabled = true;
        cfg.breakthrough.lookback = 60;
        cfg.breakthrough.cooldown = 5;
        let r = classifier(cfg).summarize(&unit("x"), &s);

        let expected: Vec<usize> = (60..200).filter(|i| !(120..=125).contains(i)).collect();
        assert_eq!(platform_days(&r.statuses()), expected);
        assert_eq!(r.platform_days, 134);
    }
}
