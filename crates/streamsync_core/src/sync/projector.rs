//! Event projection through an accepted time warp.
//!
//! Pure arithmetic: maps secondary-stream event times into the reference
//! timebase. Extrapolation beyond the fitted pulse span is allowed but
//! flagged, since the warp's reliability degrades away from the span.

use super::types::{Annotation, EventMarker, MarkerTime, TimeWarp};

/// Map a secondary-timebase instant to reference time.
pub fn project(warp: &TimeWarp, t_secs: f64) -> f64 {
    warp.apply(t_secs)
}

/// Convert a marker's onset to seconds in its stream's local timebase.
pub fn marker_onset_secs(marker: &EventMarker, sample_rate: f64) -> f64 {
    match marker.onset {
        MarkerTime::Samples(index) => index as f64 / sample_rate,
        MarkerTime::Seconds(secs) => secs,
    }
}

/// Project a stream's raw event markers into reference-timebase
/// annotations.
///
/// Sample-indexed markers are converted to seconds with the stream's own
/// sample rate before the warp is applied. Durations are scaled by the
/// warp's drift factor so intervals keep their reference-timebase extent.
pub fn project_markers(
    warp: &TimeWarp,
    sample_rate: f64,
    markers: &[EventMarker],
) -> Vec<Annotation> {
    markers
        .iter()
        .map(|marker| {
            let onset = marker_onset_secs(marker, sample_rate);
            Annotation {
                onset_secs: warp.apply(onset),
                duration_secs: warp.scale * marker.duration_secs,
                label: marker.label.clone(),
                extrapolated: warp.is_extrapolated(onset),
            }
        })
        .collect()
}
