//! Coarse pulse-train alignment.
//!
//! Finds the integer pulse-index offset that best aligns a candidate
//! train with the reference, then pairs pulses across the overlap.
//! Matching works on inter-pulse-interval (IPI) sequences rather than
//! absolute onset times, which makes the search robust to start offsets
//! and to a constant sample-rate mismatch (all intervals scale together).
//!
//! The raw correlation over all offsets is computed with an FFT
//! (convolution theorem); each candidate offset in the bounded search
//! range is then scored by normalizing with its overlap-window energies.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use super::orchestrator::CancelHandle;
use super::types::{PulseMatch, PulseTrain, SyncError, SyncResult};

/// An IPI sequence with standard deviation this small carries no timing
/// texture to correlate; alignment falls back to overlap scoring.
const DEGENERATE_STDDEV: f64 = 1e-9;

/// Configuration for pulse-train matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum overlapping intervals required to score an offset.
    pub min_overlap: usize,
    /// Bound on the absolute pulse-index offset to search, or `None` to
    /// search every offset the trains' lengths allow.
    pub max_offset: Option<usize>,
    /// How far the best normalized score must exceed the second-best
    /// (non-adjacent) score for the alignment to count as unambiguous.
    pub ambiguity_margin: f64,
    /// Maximum relative deviation of a matched interval pair's ratio
    /// from 1. Pairs exceeding this around a dropped or extra pulse are
    /// discarded.
    pub interval_tolerance: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_overlap: 3,
            max_offset: None,
            ambiguity_margin: 0.1,
            interval_tolerance: 0.2,
        }
    }
}

/// Outcome of matching a candidate train against the reference.
#[derive(Debug, Clone)]
pub struct TrainMatch {
    /// Coarse offset in pulses: candidate index minus reference index
    /// for corresponding pulses.
    pub offset: isize,
    /// Surviving pulse pairings across the overlap.
    pub matches: Vec<PulseMatch>,
    /// Normalized score of the winning offset.
    pub best_score: f64,
    /// Best score among offsets not adjacent to the winner.
    pub second_score: f64,
}

/// Align a candidate pulse train against the reference train.
///
/// The cancellation handle is observed between offset candidates, so a
/// caller abandoning a slow search gets `Cancelled` promptly.
pub fn match_trains(
    reference: &PulseTrain,
    candidate: &PulseTrain,
    config: &MatcherConfig,
    cancel: &CancelHandle,
) -> SyncResult<TrainMatch> {
    let ref_ivls = reference.intervals();
    let cand_ivls = candidate.intervals();
    let na = ref_ivls.len();
    let nb = cand_ivls.len();

    if na < config.min_overlap || nb < config.min_overlap {
        // Too few intervals to score any offset.
        return Err(SyncError::AmbiguousAlignment {
            best: 0.0,
            second: 0.0,
            margin: config.ambiguity_margin,
        });
    }

    let scores = score_offsets(&ref_ivls, &cand_ivls, config, cancel)?;

    let (best_offset, best_score) = scores
        .iter()
        .filter(|(_, s)| s.is_finite())
        .fold(None, |acc: Option<(isize, f64)>, &(k, s)| match acc {
            Some((_, best)) if s <= best => acc,
            _ => Some((k, s)),
        })
        .ok_or(SyncError::AmbiguousAlignment {
            best: 0.0,
            second: 0.0,
            margin: config.ambiguity_margin,
        })?;

    // The runner-up search skips the winner's immediate neighbors, which
    // share most of its overlap and would always track it closely.
    let second_score = scores
        .iter()
        .filter(|&&(k, s)| (k - best_offset).abs() > 1 && s.is_finite())
        .map(|&(_, s)| s)
        .fold(0.0_f64, f64::max);

    if best_score - second_score < config.ambiguity_margin {
        return Err(SyncError::AmbiguousAlignment {
            best: best_score,
            second: second_score,
            margin: config.ambiguity_margin,
        });
    }

    let matches = pair_pulses(reference, candidate, best_offset, config.interval_tolerance);

    tracing::debug!(
        offset = best_offset,
        best_score,
        second_score,
        matches = matches.len(),
        "pulse trains matched"
    );

    Ok(TrainMatch {
        offset: best_offset,
        matches,
        best_score,
        second_score,
    })
}

/// Score every candidate offset in the bounded search range.
///
/// Returns `(offset, score)` pairs; offsets whose overlap energy is
/// degenerate score negative infinity and are never selected.
fn score_offsets(
    ref_ivls: &[f64],
    cand_ivls: &[f64],
    config: &MatcherConfig,
    cancel: &CancelHandle,
) -> SyncResult<Vec<(isize, f64)>> {
    let na = ref_ivls.len();
    let nb = cand_ivls.len();
    let n_max = na.min(nb) as f64;

    let standardized = match (standardize(ref_ivls), standardize(cand_ivls)) {
        (Some(a), Some(b)) => {
            let raw = cross_correlate(&a, &b);
            Some((a, b, raw))
        }
        // A (near-)constant interval sequence has no texture to
        // correlate; only the overlap length can rank offsets.
        _ => None,
    };

    let prefix = standardized
        .as_ref()
        .map(|(a, b, _)| (prefix_energies(a), prefix_energies(b)));

    let mut k_lo = config.min_overlap as isize - na as isize;
    let mut k_hi = nb as isize - config.min_overlap as isize;
    if let Some(max_offset) = config.max_offset {
        k_lo = k_lo.max(-(max_offset as isize));
        k_hi = k_hi.min(max_offset as isize);
    }

    let mut scores = Vec::with_capacity((k_hi - k_lo + 1).max(0) as usize);
    for k in k_lo..=k_hi {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let i0 = (-k).max(0) as usize;
        let i1 = (na as isize).min(nb as isize - k) as usize;
        if i1 <= i0 || i1 - i0 < config.min_overlap {
            continue;
        }
        let overlap = (i1 - i0) as f64;

        let score = match (&standardized, &prefix) {
            (Some((_, _, raw)), Some((pa, pb))) => {
                let numerator = raw[(-k).rem_euclid(raw.len() as isize) as usize];
                let energy_ref = pa[i1] - pa[i0];
                let energy_cand = pb[(i1 as isize + k) as usize] - pb[(i0 as isize + k) as usize];
                let denom = (energy_ref * energy_cand).sqrt();
                if denom < 1e-12 {
                    f64::NEG_INFINITY
                } else {
                    (numerator / denom) * (overlap / n_max)
                }
            }
            _ => overlap / n_max,
        };
        scores.push((k, score));
    }

    Ok(scores)
}

/// Standardize a sequence to zero mean and unit variance.
///
/// Returns `None` when the sequence is too regular to carry alignment
/// information.
fn standardize(values: &[f64]) -> Option<Vec<f64>> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev < DEGENERATE_STDDEV {
        return None;
    }
    Some(values.iter().map(|&x| (x - mean) / stddev).collect())
}

/// Prefix sums of squared values; `out[i]` is the energy of `values[..i]`.
fn prefix_energies(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len() + 1);
    out.push(0.0);
    for &x in values {
        out.push(out.last().copied().unwrap_or(0.0) + x * x);
    }
    out
}

/// FFT-based raw cross-correlation.
///
/// Returns a circular array `c` of power-of-two length where
/// `c[(-k).rem_euclid(len)]` is `sum_i a[i] * b[i + k]`; zero padding to
/// `a.len() + b.len() - 1` keeps every in-range lag free of wraparound.
fn cross_correlate(a: &[f64], b: &[f64]) -> Vec<f64> {
    let fft_len = (a.len() + b.len() - 1).next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let mut a_fft: Vec<Complex<f64>> = a.iter().map(|&x| Complex::new(x, 0.0)).collect();
    a_fft.resize(fft_len, Complex::new(0.0, 0.0));

    let mut b_fft: Vec<Complex<f64>> = b.iter().map(|&x| Complex::new(x, 0.0)).collect();
    b_fft.resize(fft_len, Complex::new(0.0, 0.0));

    fft.process(&mut a_fft);
    fft.process(&mut b_fft);

    let mut product: Vec<Complex<f64>> = a_fft
        .iter()
        .zip(b_fft.iter())
        .map(|(x, y)| x * y.conj())
        .collect();

    ifft.process(&mut product);

    let scale = 1.0 / fft_len as f64;
    product.iter().map(|c| c.re * scale).collect()
}

/// Pair pulses index-by-index at the chosen offset and discard pairs not
/// supported by at least one adjacent interval ratio near 1.
fn pair_pulses(
    reference: &PulseTrain,
    candidate: &PulseTrain,
    offset: isize,
    interval_tolerance: f64,
) -> Vec<PulseMatch> {
    let ref_onsets = reference.onsets();
    let cand_onsets = candidate.onsets();
    let ref_ivls = reference.intervals();
    let cand_ivls = candidate.intervals();
    let na = ref_ivls.len();
    let nb = cand_ivls.len();

    let i0 = (-offset).max(0) as usize;
    let i1 = (na as isize).min(nb as isize - offset) as usize;
    if i1 <= i0 {
        return Vec::new();
    }

    let ratio_deviation = |ivl_index: usize| -> f64 {
        let cand_index = (ivl_index as isize + offset) as usize;
        let reference_ivl = ref_ivls[ivl_index];
        if reference_ivl <= 0.0 {
            return f64::INFINITY;
        }
        (cand_ivls[cand_index] / reference_ivl - 1.0).abs()
    };

    let mut matches = Vec::new();
    for p in i0..=i1 {
        let mut deviation = f64::INFINITY;
        if p > i0 {
            deviation = deviation.min(ratio_deviation(p - 1));
        }
        if p < i1 {
            deviation = deviation.min(ratio_deviation(p));
        }
        if deviation > interval_tolerance {
            continue;
        }
        let q = (p as isize + offset) as usize;
        matches.push(PulseMatch {
            reference_index: p,
            secondary_index: q,
            reference_secs: ref_onsets[p],
            secondary_secs: cand_onsets[q],
            interval_deviation: deviation,
        });
    }
    matches
}
