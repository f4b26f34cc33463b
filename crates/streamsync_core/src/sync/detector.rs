//! Pulse onset detection.
//!
//! Converts a raw pulse-channel signal into an ordered sequence of onset
//! times. Detection uses hysteresis thresholding (two thresholds, so
//! noise near a single crossing level cannot chatter), a refractory
//! period against double-triggers, and sub-sample linear interpolation of
//! the exact crossing instant.

use serde::{Deserialize, Serialize};

use super::conditioning::{condition, Smoothing};
use super::types::{PulseTrain, Signal, SyncError, SyncResult};

/// Configuration for pulse detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Rising threshold, in post-conditioning signal units. A low→high
    /// transition is an onset.
    pub high_threshold: f64,
    /// Re-arm threshold. The detector only re-arms once the signal falls
    /// back below this level.
    pub low_threshold: f64,
    /// Minimum spacing between onsets in seconds; later crossings inside
    /// this window are rejected as double-triggers.
    pub refractory_secs: f64,
    /// Smoothing applied before thresholding.
    pub smoothing: Smoothing,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.5,
            low_threshold: 0.2,
            refractory_secs: 0.05,
            smoothing: Smoothing::None,
        }
    }
}

/// Detect pulse onsets in a signal.
///
/// Pure function - the same signal always yields the same train.
///
/// # Returns
/// The detected pulse train. Fails with `NoPulsesFound` when fewer than
/// two onsets are present, since a single onset cannot anchor drift
/// estimation.
pub fn detect(signal: &Signal, config: &DetectorConfig) -> SyncResult<PulseTrain> {
    if config.low_threshold >= config.high_threshold {
        return Err(SyncError::InvalidSignal(format!(
            "hysteresis thresholds must satisfy low < high, got low {} >= high {}",
            config.low_threshold, config.high_threshold
        )));
    }

    let conditioned = condition(&signal.samples, signal.sample_rate, &config.smoothing);
    if conditioned.is_empty() {
        return Err(SyncError::NoPulsesFound { found: 0 });
    }

    let mut onsets = Vec::new();
    // Armed only when the signal has been observed below the low
    // threshold; a recording that starts high emits no onset until it
    // drops and rises again.
    let mut armed = conditioned[0] <= config.low_threshold;
    let mut last_onset = f64::NEG_INFINITY;

    for i in 1..conditioned.len() {
        let prev = conditioned[i - 1];
        let cur = conditioned[i];

        if armed {
            if cur >= config.high_threshold {
                // prev is below the threshold (otherwise the previous
                // iteration would have disarmed), so the crossing lies
                // between the two samples.
                let frac = if (cur - prev).abs() > f64::EPSILON {
                    ((config.high_threshold - prev) / (cur - prev)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let t = ((i - 1) as f64 + frac) / signal.sample_rate;
                if t - last_onset >= config.refractory_secs {
                    onsets.push(t);
                    last_onset = t;
                }
                armed = false;
            }
        } else if cur <= config.low_threshold {
            armed = true;
        }
    }

    tracing::debug!(
        onsets = onsets.len(),
        sample_rate = signal.sample_rate,
        "pulse detection finished"
    );

    if onsets.len() < 2 {
        return Err(SyncError::NoPulsesFound {
            found: onsets.len(),
        });
    }
    PulseTrain::new(onsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Square pulse train: `count` pulses of `width_secs`, one per
    /// `period_secs`, first rising edge at `start_secs`.
    fn make_square(
        sample_rate: f64,
        start_secs: f64,
        period_secs: f64,
        width_secs: f64,
        count: usize,
        duration_secs: f64,
    ) -> Signal {
        let n = (duration_secs * sample_rate).round() as usize;
        let mut samples = vec![0.0; n];
        for p in 0..count {
            let rise = start_secs + p as f64 * period_secs;
            let lo = (rise * sample_rate).ceil() as usize;
            let hi = (((rise + width_secs) * sample_rate).ceil() as usize).min(n);
            for sample in samples.iter_mut().take(hi).skip(lo) {
                *sample = 1.0;
            }
        }
        Signal::new(sample_rate, samples).unwrap()
    }

    #[test]
    fn detects_exact_pulse_count_at_low_rate() {
        let signal = make_square(100.0, 1.0, 1.0, 0.1, 7, 10.0);
        let train = detect(&signal, &DetectorConfig::default()).unwrap();
        assert_eq!(train.len(), 7);
    }

    #[test]
    fn detects_exact_pulse_count_at_high_rate() {
        let signal = make_square(48000.0, 1.0, 1.0, 0.1, 7, 10.0);
        let train = detect(&signal, &DetectorConfig::default()).unwrap();
        assert_eq!(train.len(), 7);
    }

    #[test]
    fn detection_is_deterministic() {
        let signal = make_square(1000.0, 0.5, 0.7, 0.05, 9, 8.0);
        let config = DetectorConfig::default();
        let first = detect(&signal, &config).unwrap();
        let second = detect(&signal, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn onset_times_are_sub_sample_interpolated() {
        // Ramp crossing: 0.0 at sample 1, 1.0 at sample 2. After DC
        // removal the crossing of the 0.5 threshold shifts with the mean.
        let samples = vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        let signal = Signal::new(10.0, samples).unwrap();
        let config = DetectorConfig {
            refractory_secs: 0.1,
            ..Default::default()
        };
        let train = detect(&signal, &config).unwrap();
        assert_eq!(train.len(), 2);

        // mean = 0.4, so levels are -0.4 / 0.6 and the 0.5 threshold is
        // crossed at fraction (0.5 + 0.4) / 1.0 = 0.9 into the rise.
        let expected_first = (1.0 + 0.9) / 10.0;
        assert!(
            (train.onsets()[0] - expected_first).abs() < 1e-9,
            "expected onset {expected_first}, got {}",
            train.onsets()[0]
        );
        // Second rise starts at sample 5.
        let expected_second = (5.0 + 0.9) / 10.0;
        assert!((train.onsets()[1] - expected_second).abs() < 1e-9);
    }

    #[test]
    fn refractory_rejects_double_triggers() {
        // Pairs of rises 20 ms apart, pairs separated by 1 s.
        let sample_rate = 1000.0;
        let n = 4000;
        let mut samples = vec![0.0; n];
        for p in 0..3 {
            for echo in [0.0, 0.02] {
                let rise = 0.5 + p as f64 + echo;
                let lo = (rise * sample_rate) as usize;
                for sample in samples.iter_mut().take(lo + 10).skip(lo) {
                    *sample = 1.0;
                }
            }
        }
        let signal = Signal::new(sample_rate, samples).unwrap();
        let train = detect(&signal, &DetectorConfig::default()).unwrap();
        assert_eq!(train.len(), 3, "echoes inside refractory must be dropped");
    }

    #[test]
    fn hysteresis_ignores_mid_band_dips() {
        // A pulse that dips to a level between the two thresholds must
        // not re-trigger.
        let mut samples = vec![0.0; 50];
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample = match i {
                10..=14 => 1.0,
                // 0.6 - mean(0.36) = 0.24, between low (0.2) and high (0.5)
                15..=19 => 0.6,
                20..=24 => 1.0,
                30..=34 => 1.0,
                _ => 0.0,
            };
        }
        let signal = Signal::new(1000.0, samples).unwrap();
        let config = DetectorConfig {
            refractory_secs: 0.001,
            ..Default::default()
        };
        let train = detect(&signal, &config).unwrap();
        assert_eq!(train.len(), 2, "mid-band dip must not produce an onset");
    }

    #[test]
    fn single_onset_is_rejected() {
        let signal = make_square(1000.0, 1.0, 1.0, 0.1, 1, 3.0);
        match detect(&signal, &DetectorConfig::default()) {
            Err(SyncError::NoPulsesFound { found }) => assert_eq!(found, 1),
            other => panic!("expected NoPulsesFound, got {other:?}"),
        }
    }

    #[test]
    fn flat_signal_yields_no_pulses() {
        let signal = Signal::new(1000.0, vec![0.3; 2000]).unwrap();
        match detect(&signal, &DetectorConfig::default()) {
            Err(SyncError::NoPulsesFound { found }) => assert_eq!(found, 0),
            other => panic!("expected NoPulsesFound, got {other:?}"),
        }
    }

    #[test]
    fn dc_offset_does_not_break_detection() {
        let base = make_square(1000.0, 0.5, 0.5, 0.05, 5, 4.0);
        let shifted: Vec<f64> = base.samples.iter().map(|&x| x + 5.0).collect();
        let signal = Signal::new(1000.0, shifted).unwrap();
        let train = detect(&signal, &DetectorConfig::default()).unwrap();
        assert_eq!(train.len(), 5);
    }

    #[test]
    fn inverted_threshold_config_is_rejected() {
        let signal = make_square(1000.0, 0.5, 0.5, 0.05, 5, 4.0);
        let config = DetectorConfig {
            high_threshold: 0.2,
            low_threshold: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            detect(&signal, &config),
            Err(SyncError::InvalidSignal(_))
        ));
    }
}
