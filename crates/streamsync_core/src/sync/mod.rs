//! Pulse-based stream alignment engine.
//!
//! Data flows one way through pure components that the orchestrator
//! composes:
//!
//! 1. **Conditioning** (`conditioning`): DC removal and optional
//!    smoothing of the raw pulse channel.
//!
//! 2. **Detection** (`detector`): hysteresis thresholding with
//!    sub-sample onset interpolation, yielding a `PulseTrain`.
//!
//! 3. **Matching** (`matcher`): coarse pulse-index offset via normalized
//!    cross-correlation of inter-pulse intervals, then per-pulse pairing.
//!
//! 4. **Estimation** (`estimator`): robust least-squares fit of the
//!    affine `TimeWarp` with a confidence label.
//!
//! 5. **Projection** (`projector`): mapping of secondary-stream event
//!    markers into reference-timebase annotations.
//!
//! The `SyncOrchestrator` owns the session state (reference train plus
//! result collection) and runs detect → match → fit per stream.
//!
//! # Usage
//!
//! ```
//! use streamsync_core::config::SyncSettings;
//! use streamsync_core::sync::{SecondaryStream, Signal, SyncOrchestrator};
//!
//! # fn pulse_samples() -> Vec<f64> {
//! #     let mut s = vec![0.0; 8000];
//! #     for p in 0..5 {
//! #         for i in 0..80 { s[1000 + p * 1200 + i] = 1.0; }
//! #     }
//! #     s
//! # }
//! let mut session = SyncOrchestrator::new(SyncSettings::default());
//! session.set_reference(Signal::new(1000.0, pulse_samples())?)?;
//!
//! let stream = SecondaryStream::new("cam1", Signal::new(1000.0, pulse_samples())?);
//! let result = session.add_stream(&stream);
//! println!("{}: {}", result.stream_id, result.confidence);
//! # Ok::<(), streamsync_core::sync::SyncError>(())
//! ```

pub mod conditioning;
mod detector;
mod estimator;
mod matcher;
mod orchestrator;
mod projector;
pub mod types;

// Re-export main types from the types module
pub use types::{
    Annotation, ConfidenceLabel, EventMarker, MarkerTime, PulseMatch, PulseTrain,
    ReferenceStream, SecondaryStream, Signal, StreamSyncResult, SyncError, SyncResult, TimeWarp,
};

// Re-export conditioning
pub use conditioning::{condition, Smoothing};

// Re-export detection
pub use detector::{detect, DetectorConfig};

// Re-export matching
pub use matcher::{match_trains, MatcherConfig, TrainMatch};

// Re-export estimation
pub use estimator::{fit, EstimatorConfig, WarpFit};

// Re-export projection
pub use projector::{marker_onset_secs, project, project_markers};

// Re-export orchestration
pub use orchestrator::{CancelHandle, SyncOrchestrator};
