//! Confidence smoothing over trailing windows.
//!
//! Every output element `i` depends only on inputs `0..=i`. Windows shorter
//! than `w` at the start of a series are valid and use what is available.
//!
//! SMA(w)[i] = mean(x[i-k+1..=i]),                         k = min(w, i+1)
//! WMA(w)[i] = sum(x[i-k+j] * (w-k+1+j), j=0..k) / sum(w-k+1..=w)
//!
//! so a partial weighted window reuses the most recent `k` weights of the
//! full `1..=w` vector.

use super::signal::{PredictionRow, SmoothedSignal, TimedSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingMode {
    Simple,
    Weighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingSpec {
    pub enabled: bool,
    pub window: usize,
    pub mode: SmoothingMode,
}

impl SmoothingSpec {
    pub fn weighted(window: usize) -> Self {
        SmoothingSpec {
            enabled: true,
            window,
            mode: SmoothingMode::Weighted,
        }
    }

    pub fn simple(window: usize) -> Self {
        SmoothingSpec {
            enabled: true,
            window,
            mode: SmoothingMode::Simple,
        }
    }

    pub fn disabled() -> Self {
        SmoothingSpec {
            enabled: false,
            window: 1,
            mode: SmoothingMode::Simple,
        }
    }
}

/// Smooth `values` according to `spec`. Disabled smoothing returns the
/// input unchanged.
pub fn smooth(values: &[f64], spec: &SmoothingSpec) -> Vec<f64> {
    if !spec.enabled {
        return values.to_vec();
    }
    match spec.mode {
        SmoothingMode::Simple => simple_moving_average(values, spec.window),
        SmoothingMode::Weighted => weighted_moving_average(values, spec.window),
    }
}

/// Trailing arithmetic mean. A window of 0 behaves as 1.
pub fn simple_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0_f64;

    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        let k = (i + 1).min(window);
        out.push(sum / k as f64);
    }

    out
}

/// Trailing linearly weighted mean, most recent element heaviest.
/// A window of 0 behaves as 1.
pub fn weighted_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        let k = (i + 1).min(window);
        let first_weight = window - k + 1;
        let start = i + 1 - k;

        let mut weighted_sum = 0.0_f64;
        let mut weight_sum = 0.0_f64;
        for (j, &v) in values[start..=i].iter().enumerate() {
            let w = (first_weight + j) as f64;
            weighted_sum += w * v;
            weight_sum += w;
        }
        out.push(weighted_sum / weight_sum);
    }

    out
}

/// Build the entry-lag and exit-lag signal series for chronologically
/// ordered raw predictions.
pub fn smooth_predictions(
    rows: &[PredictionRow],
    entry: &SmoothingSpec,
    exit: &SmoothingSpec,
) -> Vec<TimedSignal> {
    let longs: Vec<f64> = rows.iter().map(|r| r.raw_long_conf).collect();
    let shorts: Vec<f64> = rows.iter().map(|r| r.raw_short_conf).collect();

    let entry_long = smooth(&longs, entry);
    let entry_short = smooth(&shorts, entry);
    let exit_long = smooth(&longs, exit);
    let exit_short = smooth(&shorts, exit);

    rows.iter()
        .enumerate()
        .map(|(i, row)| TimedSignal {
            timestamp: row.timestamp,
            signal: SmoothedSignal {
                entry_smoothed_long: entry_long[i],
                entry_smoothed_short: entry_short[i],
                exit_smoothed_long: exit_long[i],
                exit_smoothed_short: exit_short[i],
            },
        })
        .collect()
}
