//! Affine time-warp estimation from matched pulse pairs.
//!
//! Fits `t_ref = scale * t_secondary + offset` by ordinary least squares,
//! with a single robustness pass that drops the largest-residual outliers
//! when the initial fit is loose. Not iterative re-weighting; one pass.

use serde::{Deserialize, Serialize};

use super::types::{ConfidenceLabel, PulseMatch, SyncError, SyncResult, TimeWarp};

/// Configuration for warp estimation and confidence labeling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Minimum surviving matches required for a trustworthy fit. Two
    /// points determine an affine map exactly but leave nothing to
    /// validate it with.
    pub min_matches: usize,
    /// Lower bound on a plausible drift scale.
    pub drift_min: f64,
    /// Upper bound on a plausible drift scale.
    pub drift_max: f64,
    /// Residual standard deviation above which the robustness pass runs.
    pub retry_residual_secs: f64,
    /// Multiple of the residual standard deviation beyond which a pair is
    /// an outlier in the robustness pass.
    pub outlier_sigma: f64,
    /// Residual threshold for a High confidence label, in seconds.
    pub high_residual_secs: f64,
    /// Minimum match count for a High confidence label.
    pub high_match_count: usize,
    /// Residual threshold for a Medium confidence label, in seconds.
    pub medium_residual_secs: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_matches: 3,
            drift_min: 0.9,
            drift_max: 1.1,
            retry_residual_secs: 0.005,
            outlier_sigma: 2.5,
            high_residual_secs: 0.002,
            high_match_count: 5,
            medium_residual_secs: 0.02,
        }
    }
}

/// An accepted fit plus its quality metrics.
#[derive(Debug, Clone)]
pub struct WarpFit {
    /// The fitted time warp.
    pub warp: TimeWarp,
    /// Matches the final fit used (after any outlier trimming).
    pub match_count: usize,
    /// Residual standard deviation of the final fit, in seconds.
    pub residual_stddev: f64,
    /// Discrete quality label.
    pub confidence: ConfidenceLabel,
}

/// Fit a time warp to matched pulse pairs.
///
/// Fails with `InsufficientMatches` when too few pairs survive, and with
/// `ImplausibleDrift` when the fitted scale leaves the configured bound.
pub fn fit(matches: &[PulseMatch], config: &EstimatorConfig) -> SyncResult<WarpFit> {
    if matches.len() < config.min_matches {
        return Err(SyncError::InsufficientMatches {
            found: matches.len(),
            required: config.min_matches,
        });
    }

    let xs: Vec<f64> = matches.iter().map(|m| m.secondary_secs).collect();
    let ys: Vec<f64> = matches.iter().map(|m| m.reference_secs).collect();

    let (scale, offset) = least_squares(&xs, &ys)?;
    let initial_residuals = residuals(&xs, &ys, scale, offset);
    let stddev = std_dev(&initial_residuals);

    let (xs, scale, offset, stddev) = if stddev > config.retry_residual_secs {
        // Single robustness pass: drop the worst pairs and refit.
        let cutoff = config.outlier_sigma * stddev;
        let keep: Vec<usize> = (0..xs.len())
            .filter(|&i| initial_residuals[i].abs() <= cutoff)
            .collect();
        if keep.len() < config.min_matches {
            return Err(SyncError::InsufficientMatches {
                found: keep.len(),
                required: config.min_matches,
            });
        }
        let kept_xs: Vec<f64> = keep.iter().map(|&i| xs[i]).collect();
        let kept_ys: Vec<f64> = keep.iter().map(|&i| ys[i]).collect();
        let (scale, offset) = least_squares(&kept_xs, &kept_ys)?;
        let stddev = std_dev(&residuals(&kept_xs, &kept_ys, scale, offset));
        (kept_xs, scale, offset, stddev)
    } else {
        (xs, scale, offset, stddev)
    };

    if scale < config.drift_min || scale > config.drift_max {
        return Err(SyncError::ImplausibleDrift {
            scale,
            min: config.drift_min,
            max: config.drift_max,
        });
    }

    let fitted_start_secs = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let fitted_end_secs = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let match_count = xs.len();
    let confidence = label_confidence(stddev, match_count, config);

    tracing::debug!(
        scale,
        offset,
        match_count,
        residual_stddev = stddev,
        %confidence,
        "time warp fitted"
    );

    Ok(WarpFit {
        warp: TimeWarp {
            scale,
            offset_secs: offset,
            fitted_start_secs,
            fitted_end_secs,
        },
        match_count,
        residual_stddev: stddev,
        confidence,
    })
}

/// Ordinary least squares: `y = scale * x + offset`.
fn least_squares(xs: &[f64], ys: &[f64]) -> SyncResult<(f64, f64)> {
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        numerator += (x - x_mean) * (y - y_mean);
        denominator += (x - x_mean) * (x - x_mean);
    }

    if denominator.abs() < 1e-12 {
        // Strictly ascending onsets make this unreachable in practice.
        return Err(SyncError::InvalidSignal(
            "degenerate pulse spacing: matched onsets do not span time".into(),
        ));
    }

    let scale = numerator / denominator;
    let offset = y_mean - scale * x_mean;
    Ok((scale, offset))
}

fn residuals(xs: &[f64], ys: &[f64], scale: f64, offset: f64) -> Vec<f64> {
    xs.iter()
        .zip(ys.iter())
        .map(|(&x, &y)| y - (scale * x + offset))
        .collect()
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Derive the discrete confidence label from fixed thresholds.
fn label_confidence(stddev: f64, match_count: usize, config: &EstimatorConfig) -> ConfidenceLabel {
    if stddev <= config.high_residual_secs && match_count >= config.high_match_count {
        ConfidenceLabel::High
    } else if stddev <= config.medium_residual_secs {
        ConfidenceLabel::Medium
    } else {
        ConfidenceLabel::Low
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn make_matches(xs: &[f64], ys: &[f64]) -> Vec<PulseMatch> {
        xs.iter()
            .zip(ys.iter())
            .enumerate()
            .map(|(i, (&x, &y))| PulseMatch {
                reference_index: i,
                secondary_index: i,
                reference_secs: y,
                secondary_secs: x,
                interval_deviation: 0.0,
            })
            .collect()
    }

    #[test]
    fn recovers_known_affine_relationship() {
        let scale = 1.001;
        let offset = -0.4995;
        let xs: Vec<f64> = (0..10).map(|i| 1.0 + i as f64 * 0.9).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| scale * x + offset).collect();

        let result = fit(&make_matches(&xs, &ys), &EstimatorConfig::default()).unwrap();

        assert_abs_diff_eq!(result.warp.scale, scale, epsilon = 1e-4);
        assert_abs_diff_eq!(result.warp.offset_secs, offset, epsilon = 1e-4);
        assert!(result.residual_stddev < 1e-9);
        assert_eq!(result.confidence, ConfidenceLabel::High);
        assert_eq!(result.match_count, 10);
    }

    #[test]
    fn records_fitted_span() {
        let xs = vec![2.0, 3.0, 5.0, 8.0];
        let ys = xs.clone();
        let result = fit(&make_matches(&xs, &ys), &EstimatorConfig::default()).unwrap();
        assert_eq!(result.warp.fitted_start_secs, 2.0);
        assert_eq!(result.warp.fitted_end_secs, 8.0);
    }

    #[test]
    fn too_few_matches_fail() {
        let xs = vec![1.0, 2.0];
        let ys = vec![1.0, 2.0];
        match fit(&make_matches(&xs, &ys), &EstimatorConfig::default()) {
            Err(SyncError::InsufficientMatches { found, required }) => {
                assert_eq!(found, 2);
                assert_eq!(required, 3);
            }
            other => panic!("expected InsufficientMatches, got {other:?}"),
        }
    }

    #[test]
    fn outlier_pair_is_trimmed() {
        // Ten exact pairs plus one pair a full second off, mid-span.
        let mut xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut ys: Vec<f64> = xs.iter().map(|&x| 1.0005 * x + 0.25).collect();
        xs.push(4.5);
        ys.push(1.0005 * 4.5 + 0.25 + 1.0);

        let result = fit(&make_matches(&xs, &ys), &EstimatorConfig::default()).unwrap();

        assert_eq!(result.match_count, 10, "the broken pair must be dropped");
        assert_abs_diff_eq!(result.warp.scale, 1.0005, epsilon = 1e-6);
        assert_abs_diff_eq!(result.warp.offset_secs, 0.25, epsilon = 1e-6);
        assert_eq!(result.confidence, ConfidenceLabel::High);
    }

    #[test]
    fn implausible_drift_is_rejected() {
        let xs: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| 1.5 * x).collect();
        match fit(&make_matches(&xs, &ys), &EstimatorConfig::default()) {
            Err(SyncError::ImplausibleDrift { scale, .. }) => {
                assert!((scale - 1.5).abs() < 1e-9);
            }
            other => panic!("expected ImplausibleDrift, got {other:?}"),
        }
    }

    #[test]
    fn moderate_residuals_label_medium() {
        let xs: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(i, &x)| x + if i % 2 == 0 { 0.01 } else { -0.01 })
            .collect();

        let result = fit(&make_matches(&xs, &ys), &EstimatorConfig::default()).unwrap();
        assert_eq!(result.confidence, ConfidenceLabel::Medium);
        assert!(result.residual_stddev > 0.002);
    }

    #[test]
    fn loose_residuals_label_low() {
        let xs: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(i, &x)| x + if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();

        let result = fit(&make_matches(&xs, &ys), &EstimatorConfig::default()).unwrap();
        assert_eq!(result.confidence, ConfidenceLabel::Low);
    }

    #[test]
    fn few_perfect_matches_are_not_high_confidence() {
        let xs = vec![1.0, 2.0, 3.0];
        let ys = xs.clone();
        let result = fit(&make_matches(&xs, &ys), &EstimatorConfig::default()).unwrap();
        assert_eq!(result.confidence, ConfidenceLabel::Medium);
    }
}
