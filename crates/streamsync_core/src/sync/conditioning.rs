//! Signal conditioning before pulse detection.
//!
//! Removes the DC offset and optionally smooths the pulse channel to
//! reduce detector jitter. Smoothing is a centered moving average by
//! default; noisy sources can use an IIR Butterworth low-pass via the
//! biquad crate instead.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F64};
use serde::{Deserialize, Serialize};

/// Smoothing applied to the pulse channel after DC removal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Smoothing {
    /// No smoothing.
    #[default]
    None,
    /// Centered moving average over a short window.
    MovingAverage {
        /// Window length in seconds.
        window_secs: f64,
    },
    /// Butterworth low-pass, implemented as cascaded biquad sections.
    LowPass {
        /// Cutoff frequency in Hz.
        cutoff_hz: f64,
        /// Filter order (higher = steeper rolloff).
        order: usize,
    },
}

/// Remove the DC offset and apply the configured smoothing.
///
/// Pure function - no I/O, no side effects.
pub fn condition(samples: &[f64], sample_rate: f64, smoothing: &Smoothing) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let centered: Vec<f64> = samples.iter().map(|&x| x - mean).collect();

    match *smoothing {
        Smoothing::None => centered,
        Smoothing::MovingAverage { window_secs } => {
            moving_average(&centered, sample_rate, window_secs)
        }
        Smoothing::LowPass { cutoff_hz, order } => {
            butterworth_lowpass(&centered, sample_rate, cutoff_hz, order)
        }
    }
}

/// Centered moving average with a window derived from the sample rate.
///
/// A window shorter than one sample is a no-op, so a fixed `window_secs`
/// stays harmless on low-rate signals.
fn moving_average(samples: &[f64], sample_rate: f64, window_secs: f64) -> Vec<f64> {
    let mut window = (window_secs * sample_rate).round() as usize;
    if window <= 1 {
        return samples.to_vec();
    }
    // Force an odd window so the average stays centered.
    if window % 2 == 0 {
        window += 1;
    }
    let half = window / 2;

    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0);
    for &x in samples {
        prefix.push(prefix.last().copied().unwrap_or(0.0) + x);
    }

    (0..samples.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(samples.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Apply a Butterworth low-pass as cascaded second-order sections.
fn butterworth_lowpass(samples: &[f64], sample_rate: f64, cutoff_hz: f64, order: usize) -> Vec<f64> {
    let fs = sample_rate.hz();
    let f0 = cutoff_hz.hz();

    let coeffs = match Coefficients::<f64>::from_params(Type::LowPass, fs, f0, Q_BUTTERWORTH_F64) {
        Ok(c) => c,
        Err(_) => return samples.to_vec(), // Return unfiltered on bad parameters
    };

    // A biquad is 2nd order, so order/2 sections (minimum 1).
    let num_sections = ((order + 1) / 2).max(1);

    let mut result = samples.to_vec();
    for _ in 0..num_sections {
        let mut filter = DirectForm2Transposed::<f64>::new(coeffs);
        for sample in &mut result {
            *sample = filter.run(*sample);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_dc_offset() {
        let samples = vec![5.0; 100];
        let out = condition(&samples, 100.0, &Smoothing::None);
        assert!(out.iter().all(|&x| x.abs() < 1e-12));
    }

    #[test]
    fn none_preserves_shape() {
        let samples = vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        let out = condition(&samples, 100.0, &Smoothing::None);
        // Same transitions, shifted down by the mean.
        let mean = 2.0 / 6.0;
        assert!((out[2] - (1.0 - mean)).abs() < 1e-12);
        assert!((out[0] - (0.0 - mean)).abs() < 1e-12);
    }

    #[test]
    fn moving_average_is_noop_below_one_sample() {
        let samples = vec![0.0, 1.0, 0.0, 1.0];
        // 1 ms window at 100 Hz is a fraction of a sample.
        let out = condition(
            &samples,
            100.0,
            &Smoothing::MovingAverage { window_secs: 0.001 },
        );
        let plain = condition(&samples, 100.0, &Smoothing::None);
        assert_eq!(out, plain);
    }

    #[test]
    fn moving_average_flattens_single_sample_spike() {
        let mut samples = vec![0.0; 101];
        samples[50] = 1.0;
        let out = condition(
            &samples,
            1000.0,
            &Smoothing::MovingAverage { window_secs: 0.005 },
        );
        let plain = condition(&samples, 1000.0, &Smoothing::None);
        assert!(out[50] < plain[50]);
    }

    #[test]
    fn lowpass_attenuates_high_frequency() {
        let sample_rate = 48000.0;
        let n = 4800;
        let samples: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate;
                (2.0 * std::f64::consts::PI * 10000.0 * t).sin()
            })
            .collect();

        let out = condition(
            &samples,
            sample_rate,
            &Smoothing::LowPass {
                cutoff_hz: 100.0,
                order: 4,
            },
        );

        // Skip the filter's settling region, then compare RMS.
        let rms = |xs: &[f64]| (xs.iter().map(|x| x * x).sum::<f64>() / xs.len() as f64).sqrt();
        assert!(rms(&out[1000..]) < rms(&samples[1000..]) * 0.2);
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(condition(&[], 100.0, &Smoothing::None).is_empty());
    }
}
