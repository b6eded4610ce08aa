//! GEO preprocessing chain: fixed-grid resampling, Hampel filtering, winsorization.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::table::{TableError, TimeSeriesTable};

pub const DEFAULT_RESAMPLE_INTERVAL_SECS: i64 = 15 * 60;
pub const DEFAULT_HAMPEL_WINDOW: usize = 48;
pub const DEFAULT_HAMPEL_N_SIGMAS: f64 = 2.5;
pub const DEFAULT_WINSOR_LIMIT: f64 = 0.005;
pub const DEFAULT_MAX_RESAMPLED_ROWS: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPreprocessConfig {
    pub resample_interval_secs: i64,
    pub hampel_window: usize,
    pub hampel_n_sigmas: f64,
    pub winsor_limit: f64,
    pub max_resampled_rows: usize,
}

impl Default for GeoPreprocessConfig {
    fn default() -> Self {
        Self {
            resample_interval_secs: DEFAULT_RESAMPLE_INTERVAL_SECS,
            hampel_window: DEFAULT_HAMPEL_WINDOW,
            hampel_n_sigmas: DEFAULT_HAMPEL_N_SIGMAS,
            winsor_limit: DEFAULT_WINSOR_LIMIT,
            max_resampled_rows: DEFAULT_MAX_RESAMPLED_ROWS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub input_rows: usize,
    pub output_rows: usize,
    pub empty_bins: usize,
    pub hampel_replacements: usize,
    pub winsorized_points: usize,
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("invalid preprocess config: {0}")]
    InvalidConfig(String),
    #[error("CSV contains no data rows")]
    NoRows,
    #[error("Column {0} has no numeric values")]
    AllMissing(String),
    #[error("Time span covers {span_rows} resampled rows, exceeding the limit of {max_rows}")]
    SpanTooLarge { span_rows: u64, max_rows: usize },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Runs resample, Hampel filter and winsorization in that order.
pub fn preprocess_geo(
    table: &TimeSeriesTable,
    cfg: &GeoPreprocessConfig,
) -> Result<(TimeSeriesTable, PreprocessReport), PreprocessError> {
    validate_config(cfg)?;

    let (mut resampled, empty_bins) =
        resample_and_impute(table, cfg.resample_interval_secs, cfg.max_resampled_rows)?;

    let mut hampel_replacements = 0;
    let mut winsorized_points = 0;
    for values in resampled.columns_mut() {
        hampel_replacements += hampel_filter(values, cfg.hampel_window, cfg.hampel_n_sigmas);
        winsorized_points += winsorize(values, cfg.winsor_limit);
    }

    let report = PreprocessReport {
        input_rows: table.len(),
        output_rows: resampled.len(),
        empty_bins,
        hampel_replacements,
        winsorized_points,
    };

    info!(
        component = "preprocess",
        event = "preprocess.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        empty_bins = report.empty_bins,
        hampel_replacements = report.hampel_replacements,
        winsorized_points = report.winsorized_points
    );

    Ok((resampled, report))
}

/// Averages rows into epoch-aligned bins of `interval_secs`, then fills empty
/// bins by time interpolation followed by forward and backward fill.
///
/// Returns the regular table and the number of bins that held no observation.
pub fn resample_and_impute(
    table: &TimeSeriesTable,
    interval_secs: i64,
    max_rows: usize,
) -> Result<(TimeSeriesTable, usize), PreprocessError> {
    if interval_secs <= 0 {
        return Err(PreprocessError::InvalidConfig(
            "resample interval must be > 0 seconds".to_string(),
        ));
    }

    let bins: Vec<i64> = table
        .timestamps()
        .iter()
        .map(|ts| ts.timestamp().div_euclid(interval_secs))
        .collect();
    let (Some(first_bin), Some(last_bin)) =
        (bins.iter().copied().min(), bins.iter().copied().max())
    else {
        return Err(PreprocessError::NoRows);
    };

    let span_rows = (last_bin - first_bin) as u64 + 1;
    if span_rows > max_rows as u64 {
        return Err(PreprocessError::SpanTooLarge {
            span_rows,
            max_rows,
        });
    }
    let n_bins = span_rows as usize;

    let mut populated = vec![false; n_bins];
    for bin in &bins {
        populated[(bin - first_bin) as usize] = true;
    }
    let empty_bins = populated.iter().filter(|p| !**p).count();

    let mut columns = Vec::with_capacity(table.n_features());
    for (col_idx, name) in table.feature_names().iter().enumerate() {
        let mut sums = vec![0.0; n_bins];
        let mut counts = vec![0usize; n_bins];
        for (bin, value) in bins.iter().zip(table.column(col_idx)) {
            if value.is_nan() {
                continue;
            }
            let slot = (bin - first_bin) as usize;
            sums[slot] += value;
            counts[slot] += 1;
        }

        let mut values: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| {
                if *count == 0 {
                    f64::NAN
                } else {
                    sum / *count as f64
                }
            })
            .collect();

        if !impute_column(&mut values) {
            return Err(PreprocessError::AllMissing(name.clone()));
        }
        columns.push(values);
    }

    let timestamps = (0..n_bins)
        .map(|offset| bin_label(first_bin + offset as i64, interval_secs))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            PreprocessError::InvalidConfig("resampled timestamp out of range".to_string())
        })?;

    let resampled = TimeSeriesTable::new(timestamps, table.feature_names().to_vec(), columns)?;
    Ok((resampled, empty_bins))
}

/// Replaces points deviating more than `n_sigmas` rolling MADs from the
/// centered rolling median. Returns the number of replaced points.
pub fn hampel_filter(values: &mut [f64], window: usize, n_sigmas: f64) -> usize {
    let reference = rolling_median_centered(values, window);
    let deviations: Vec<f64> = values
        .iter()
        .zip(&reference)
        .map(|(value, center)| match center {
            Some(center) => (value - center).abs(),
            None => f64::NAN,
        })
        .collect();
    let mad = rolling_median_centered(&deviations, window);

    let mut replaced = 0;
    for (idx, value) in values.iter_mut().enumerate() {
        // Undefined reference or MAD leaves the point as-is.
        let (Some(center), Some(mad)) = (reference[idx], mad[idx]) else {
            continue;
        };
        if (*value - center).abs() > n_sigmas * mad {
            *value = center;
            replaced += 1;
        }
    }
    replaced
}

/// Clamps values outside the `[limit, 1 - limit]` empirical quantiles.
/// Returns the number of clamped points.
pub fn winsorize(values: &mut [f64], limit: f64) -> usize {
    if limit <= 0.0 {
        return 0;
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return 0;
    }
    sorted.sort_by(f64::total_cmp);
    let lo = quantile_linear(&sorted, limit);
    let hi = quantile_linear(&sorted, 1.0 - limit);

    let mut clamped = 0;
    for value in values.iter_mut().filter(|v| !v.is_nan()) {
        let bounded = value.clamp(lo, hi);
        if bounded != *value {
            *value = bounded;
            clamped += 1;
        }
    }
    clamped
}

/// Centered rolling median; `None` where the window leaves the series or
/// covers a `NaN`. For even windows the center sits right of the midpoint.
pub fn rolling_median_centered(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let n = values.len();
    if window == 0 {
        return vec![None; n];
    }
    let offset = (window - 1) / 2;

    let mut scratch = Vec::with_capacity(window);
    (0..n)
        .map(|idx| {
            let end = idx + 1 + offset;
            if end > n || end < window {
                return None;
            }
            let slice = &values[end - window..end];
            if slice.iter().any(|v| v.is_nan()) {
                return None;
            }
            scratch.clear();
            scratch.extend_from_slice(slice);
            median_in_place(&mut scratch)
        })
        .collect()
}

/// Linear-interpolation quantile of an ascending slice.
pub fn quantile_linear(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn median_in_place(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) * 0.5)
    }
}

fn impute_column(values: &mut [f64]) -> bool {
    let valid: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(idx, v)| (!v.is_nan()).then_some(idx))
        .collect();
    let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
        return false;
    };

    for pair in valid.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if right - left < 2 {
            continue;
        }
        let (v_left, v_right) = (values[left], values[right]);
        let span = (right - left) as f64;
        for idx in left + 1..right {
            let frac = (idx - left) as f64 / span;
            values[idx] = v_left + (v_right - v_left) * frac;
        }
    }

    let head = values[first];
    values[..first].fill(head);
    let tail = values[last];
    values[last + 1..].fill(tail);
    true
}

fn bin_label(bin: i64, interval_secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(bin.checked_mul(interval_secs)?, 0).single()
}

fn validate_config(cfg: &GeoPreprocessConfig) -> Result<(), PreprocessError> {
    if cfg.resample_interval_secs <= 0 {
        return Err(PreprocessError::InvalidConfig(
            "resample_interval_secs must be > 0".to_string(),
        ));
    }
    if cfg.hampel_window == 0 {
        return Err(PreprocessError::InvalidConfig(
            "hampel_window must be > 0".to_string(),
        ));
    }
    if !cfg.hampel_n_sigmas.is_finite() || cfg.hampel_n_sigmas < 0.0 {
        return Err(PreprocessError::InvalidConfig(
            "hampel_n_sigmas must be finite and >= 0".to_string(),
        ));
    }
    if !(0.0..0.5).contains(&cfg.winsor_limit) {
        return Err(PreprocessError::InvalidConfig(
            "winsor_limit must satisfy 0.0 <= limit < 0.5".to_string(),
        ));
    }
    if cfg.max_resampled_rows == 0 {
        return Err(PreprocessError::InvalidConfig(
            "max_resampled_rows must be > 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(minute_offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600 + minute_offset * 60, 0)
            .single()
            .expect("valid timestamp")
    }

    fn smooth_series(n: usize) -> Vec<f64> {
        (0..n).map(|i| 10.0 + 0.1 * (i as f64 * 0.3).sin()).collect()
    }

    #[test]
    fn resample_averages_within_bins_and_interpolates_gaps() {
        let table = TimeSeriesTable::new(
            vec![ts(0), ts(5), ts(30), ts(75)],
            vec!["a".to_string()],
            vec![vec![1.0, 3.0, 6.0, 12.0]],
        )
        .expect("table builds");

        let (out, empty_bins) =
            resample_and_impute(&table, DEFAULT_RESAMPLE_INTERVAL_SECS, 1_000).expect("resamples");

        assert_eq!(out.len(), 6);
        assert_eq!(empty_bins, 3);
        assert_eq!(out.timestamps()[0], ts(0));
        assert_eq!(out.timestamps()[5], ts(75));
        let values = out.column(0);
        assert_eq!(values[0], 2.0);
        assert_eq!(values[1], 4.0);
        assert_eq!(values[2], 6.0);
        assert_eq!(values[3], 8.0);
        assert_eq!(values[4], 10.0);
        assert_eq!(values[5], 12.0);
    }

    #[test]
    fn resample_fills_leading_and_trailing_gaps_from_nearest_value() {
        let table = TimeSeriesTable::new(
            vec![ts(0), ts(15), ts(30), ts(45)],
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![f64::NAN, 5.0, f64::NAN, f64::NAN],
                vec![1.0, f64::NAN, 3.0, 4.0],
            ],
        )
        .expect("table builds");

        let (out, _) = resample_and_impute(&table, DEFAULT_RESAMPLE_INTERVAL_SECS, 1_000)
            .expect("resamples");
        assert_eq!(out.missing_count(), 0);
        assert_eq!(out.column(0), [5.0, 5.0, 5.0, 5.0]);
        assert_eq!(out.column(1), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn resample_rejects_all_missing_column_and_oversized_span() {
        let table = TimeSeriesTable::new(
            vec![ts(0), ts(15)],
            vec!["a".to_string()],
            vec![vec![f64::NAN, f64::NAN]],
        )
        .expect("table builds");
        assert!(matches!(
            resample_and_impute(&table, DEFAULT_RESAMPLE_INTERVAL_SECS, 1_000),
            Err(PreprocessError::AllMissing(name)) if name == "a"
        ));

        let table = TimeSeriesTable::new(
            vec![ts(0), ts(15 * 2_000)],
            vec!["a".to_string()],
            vec![vec![1.0, 2.0]],
        )
        .expect("table builds");
        assert!(matches!(
            resample_and_impute(&table, DEFAULT_RESAMPLE_INTERVAL_SECS, 1_000),
            Err(PreprocessError::SpanTooLarge { .. })
        ));
    }

    #[test]
    fn rolling_median_window_placement_matches_centered_convention() {
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let medians = rolling_median_centered(&values, 4);

        // window for idx covers [idx - 2, idx + 1]
        assert_eq!(medians[0], None);
        assert_eq!(medians[1], None);
        assert_eq!(medians[2], Some(1.5));
        assert_eq!(medians[8], Some(7.5));
        assert_eq!(medians[9], None);
    }

    #[test]
    fn hampel_replaces_interior_spike_with_local_median() {
        let mut values = smooth_series(200);
        values[100] = 10.0 + 50.0;

        let replaced = hampel_filter(&mut values, DEFAULT_HAMPEL_WINDOW, DEFAULT_HAMPEL_N_SIGMAS);

        assert!(replaced >= 1);
        assert!((values[100] - 10.0).abs() < 0.2, "got {}", values[100]);
    }

    #[test]
    fn hampel_leaves_boundary_points_untouched() {
        let mut values = smooth_series(200);
        values[10] = 1_000.0;
        values[190] = -1_000.0;

        hampel_filter(&mut values, DEFAULT_HAMPEL_WINDOW, DEFAULT_HAMPEL_N_SIGMAS);

        assert_eq!(values[10], 1_000.0);
        assert_eq!(values[190], -1_000.0);
    }

    #[test]
    fn winsorize_bounds_by_linear_quantiles_and_keeps_length() {
        let mut values: Vec<f64> = (0..400).map(|i| i as f64).collect();
        values[17] = 1e9;
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        let hi = quantile_linear(&sorted, 0.995);
        let lo = quantile_linear(&sorted, 0.005);

        let clamped = winsorize(&mut values, DEFAULT_WINSOR_LIMIT);

        assert_eq!(values.len(), 400);
        assert!(clamped >= 2);
        let max = values.iter().copied().fold(f64::MIN, f64::max);
        let min = values.iter().copied().fold(f64::MAX, f64::min);
        assert!(max <= hi + 1e-9);
        assert!(min >= lo - 1e-9);
    }

    #[test]
    fn preprocess_rejects_invalid_config() {
        let table = TimeSeriesTable::new(vec![ts(0)], vec!["a".to_string()], vec![vec![1.0]])
            .expect("table builds");
        let cfg = GeoPreprocessConfig {
            winsor_limit: 0.7,
            ..GeoPreprocessConfig::default()
        };
        assert!(matches!(
            preprocess_geo(&table, &cfg),
            Err(PreprocessError::InvalidConfig(_))
        ));
    }
}
