//! Trailing-window statistics over daily columns.
//!
//! Every function returns one `Option<f64>` per input position; `None` means
//! the window ending there is not yet full (or an input inside it is missing).
//! Max/min use monotonic deques; sums and deviations are evaluated over the
//! exact trailing window so results never drift from a fresh recomputation.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Max,
    Min,
}

/// Rolling max/min with O(1) amortised push.
#[derive(Debug, Clone)]
struct MonotonicWindow {
    window: usize,
    kind: Extremum,
    /// (index, value), values monotonic from front to back.
    deque: VecDeque<(usize, f64)>,
}

impl MonotonicWindow {
    fn new(window: usize, kind: Extremum) -> Self {
        Self { window, kind, deque: VecDeque::with_capacity(window) }
    }

    fn push(&mut self, index: usize, value: f64) -> Option<f64> {
        while let Some(&(_, back)) = self.deque.back() {
            let dominated = match self.kind {
                Extremum::Max => back <= value,
                Extremum::Min => back >= value,
            };
            if !dominated {
                break;
            }
            self.deque.pop_back();
        }
        self.deque.push_back((index, value));

        while let Some(&(front, _)) = self.deque.front() {
            if front + self.window <= index {
                self.deque.pop_front();
            } else {
                break;
            }
        }

        if index + 1 >= self.window {
            self.deque.front().map(|&(_, v)| v)
        } else {
            None
        }
    }
}

fn rolling_extremum(values: &[f64], window: usize, kind: Extremum) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    let mut w = MonotonicWindow::new(window, kind);
    values.iter().enumerate().map(|(i, &v)| w.push(i, v)).collect()
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_extremum(values, window, Extremum::Max)
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_extremum(values, window, Extremum::Min)
}

/// Trailing mean; `None` for the first `window - 1` positions.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for (k, slice) in values.windows(window).enumerate() {
        out[k + window - 1] = Some(mean(slice));
    }
    out
}

/// Trailing sample standard deviation over a column that may contain gaps.
/// A window containing any `None` yields `None`.
pub fn rolling_sample_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window < 2 || values.len() < window {
        return out;
    }
    let mut buf = Vec::with_capacity(window);
    for (k, slice) in values.windows(window).enumerate() {
        buf.clear();
        buf.extend(slice.iter().flatten());
        if buf.len() == window {
            out[k + window - 1] = sample_std(&buf);
        }
    }
    out
}

pub fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population (ddof = 0) standard deviation.
pub fn population_std(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    Some(var.sqrt())
}

/// Sample (ddof = 1) standard deviation.
pub fn sample_std(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    Some(var.sqrt())
}
