//! Core types for pulse-based stream alignment.

use serde::{Deserialize, Serialize};

/// A raw single-channel recording handed in by an ingestion collaborator.
///
/// The core never parses file formats; a `Signal` is already-decoded
/// numeric data plus its nominal sample rate.
#[derive(Debug, Clone)]
pub struct Signal {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Samples as f64, one channel.
    pub samples: Vec<f64>,
}

impl Signal {
    /// Create a new signal, validating its invariants.
    ///
    /// Fails if the sample rate is not a positive finite number or the
    /// sample sequence is empty.
    pub fn new(sample_rate: f64, samples: Vec<f64>) -> SyncResult<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(SyncError::InvalidSignal(format!(
                "sample rate must be positive and finite, got {sample_rate}"
            )));
        }
        if samples.is_empty() {
            return Err(SyncError::InvalidSignal("empty sample sequence".into()));
        }
        Ok(Self {
            sample_rate,
            samples,
        })
    }

    /// Get the number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the signal is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Time of a (possibly fractional) sample index in seconds.
    pub fn time_of_sample(&self, index: f64) -> f64 {
        index / self.sample_rate
    }
}

/// An ordered sequence of pulse onset times, in seconds relative to the
/// owning signal's start.
///
/// Derived from a `Signal` by the detector; never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseTrain {
    onsets: Vec<f64>,
}

impl PulseTrain {
    /// Create a pulse train from onset times.
    ///
    /// Fails unless the onsets are strictly ascending.
    pub fn new(onsets: Vec<f64>) -> SyncResult<Self> {
        if onsets.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SyncError::InvalidSignal(
                "pulse onsets must be strictly ascending".into(),
            ));
        }
        Ok(Self { onsets })
    }

    /// Get the onset times.
    pub fn onsets(&self) -> &[f64] {
        &self.onsets
    }

    /// Get the number of onsets.
    pub fn len(&self) -> usize {
        self.onsets.len()
    }

    /// Check if the train has no onsets.
    pub fn is_empty(&self) -> bool {
        self.onsets.is_empty()
    }

    /// First onset time, if any.
    pub fn first(&self) -> Option<f64> {
        self.onsets.first().copied()
    }

    /// Last onset time, if any.
    pub fn last(&self) -> Option<f64> {
        self.onsets.last().copied()
    }

    /// Consecutive inter-pulse intervals (one fewer than the onset count).
    pub fn intervals(&self) -> Vec<f64> {
        self.onsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Time spanned from first to last onset.
    pub fn span_secs(&self) -> f64 {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}

/// The stream designated as the canonical timebase.
///
/// Created once per session by the orchestrator; immutable thereafter.
#[derive(Debug, Clone)]
pub struct ReferenceStream {
    /// The raw pulse-channel signal.
    pub signal: Signal,
    /// The pulse train detected from the signal.
    pub pulses: PulseTrain,
}

/// When an event marker occurred, in the owning stream's local timebase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MarkerTime {
    /// A sample index into the stream's own recording.
    Samples(u64),
    /// Seconds from the stream's start.
    Seconds(f64),
}

/// A raw event marker attached to a secondary stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMarker {
    /// When the event starts, in the stream's local timebase.
    pub onset: MarkerTime,
    /// Event duration in seconds (0.0 for instantaneous markers).
    pub duration_secs: f64,
    /// Event label.
    pub label: String,
}

impl EventMarker {
    /// Create an instantaneous marker.
    pub fn new(onset: MarkerTime, label: impl Into<String>) -> Self {
        Self {
            onset,
            duration_secs: 0.0,
            label: label.into(),
        }
    }

    /// Set the marker's duration.
    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }
}

/// A secondary recording to align against the reference.
///
/// Audio-derived and video-derived streams are the same abstraction;
/// they differ only in how their pulse `Signal` was produced.
#[derive(Debug, Clone)]
pub struct SecondaryStream {
    /// Stream identifier (name or source path).
    pub id: String,
    /// The channel carrying the synchronization pulses.
    pub pulse_signal: Signal,
    /// Optional co-recorded data channel.
    pub data_signal: Option<Signal>,
    /// Raw event markers in the stream's local timebase.
    pub events: Vec<EventMarker>,
}

impl SecondaryStream {
    /// Create a stream with just a pulse channel.
    pub fn new(id: impl Into<String>, pulse_signal: Signal) -> Self {
        Self {
            id: id.into(),
            pulse_signal,
            data_signal: None,
            events: Vec::new(),
        }
    }

    /// Attach a co-recorded data channel.
    pub fn with_data_signal(mut self, data_signal: Signal) -> Self {
        self.data_signal = Some(data_signal);
        self
    }

    /// Attach raw event markers.
    pub fn with_events(mut self, events: Vec<EventMarker>) -> Self {
        self.events = events;
        self
    }
}

/// One pulse pairing between the reference and a secondary train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseMatch {
    /// Index of the pulse in the reference train.
    pub reference_index: usize,
    /// Index of the pulse in the secondary train.
    pub secondary_index: usize,
    /// Reference onset time in seconds.
    pub reference_secs: f64,
    /// Secondary onset time in seconds.
    pub secondary_secs: f64,
    /// Smallest adjacent inter-pulse-interval ratio deviation supporting
    /// this pairing (0.0 = intervals agree exactly).
    pub interval_deviation: f64,
}

/// Affine mapping from a secondary stream's local time to reference time:
/// `t_ref = scale * t_secondary + offset_secs`.
///
/// Immutable once accepted by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWarp {
    /// Drift scale factor (expected near 1.0).
    pub scale: f64,
    /// Constant offset in seconds.
    pub offset_secs: f64,
    /// First matched pulse time (secondary timebase) the fit covers.
    pub fitted_start_secs: f64,
    /// Last matched pulse time (secondary timebase) the fit covers.
    pub fitted_end_secs: f64,
}

impl TimeWarp {
    /// Map a secondary-timebase instant to reference time.
    pub fn apply(&self, t_secs: f64) -> f64 {
        self.scale * t_secs + self.offset_secs
    }

    /// Whether a secondary-timebase instant lies outside the fitted span.
    pub fn is_extrapolated(&self, t_secs: f64) -> bool {
        t_secs < self.fitted_start_secs || t_secs > self.fitted_end_secs
    }
}

/// Discrete quality label for a stream's alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLabel {
    /// Tight residuals over enough pulses.
    High,
    /// Usable fit with moderate residuals.
    Medium,
    /// Fit accepted but residuals or pulse coverage are poor.
    Low,
    /// Alignment failed; no usable warp.
    Failed,
}

impl std::fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLabel::High => write!(f, "high"),
            ConfidenceLabel::Medium => write!(f, "medium"),
            ConfidenceLabel::Low => write!(f, "low"),
            ConfidenceLabel::Failed => write!(f, "failed"),
        }
    }
}

/// Per-stream alignment outcome recorded in the session report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSyncResult {
    /// Identifier of the aligned stream.
    pub stream_id: String,
    /// The stream's own sample rate (used to project sample-indexed events).
    pub sample_rate: f64,
    /// Accepted time warp, or `None` when alignment failed.
    pub warp: Option<TimeWarp>,
    /// Number of pulse matches the accepted fit used.
    pub match_count: usize,
    /// Residual standard deviation of the fit, in seconds.
    pub residual_stddev: f64,
    /// Discrete quality label.
    pub confidence: ConfidenceLabel,
    /// Failure reason when alignment failed.
    pub failure: Option<String>,
}

impl StreamSyncResult {
    /// Create a successful result.
    pub fn aligned(
        stream_id: impl Into<String>,
        sample_rate: f64,
        warp: TimeWarp,
        match_count: usize,
        residual_stddev: f64,
        confidence: ConfidenceLabel,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            sample_rate,
            warp: Some(warp),
            match_count,
            residual_stddev,
            confidence,
            failure: None,
        }
    }

    /// Create a failed result with an explicit reason.
    pub fn failed(stream_id: impl Into<String>, sample_rate: f64, reason: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            sample_rate,
            warp: None,
            match_count: 0,
            residual_stddev: 0.0,
            confidence: ConfidenceLabel::Failed,
            failure: Some(reason.into()),
        }
    }

    /// Whether this stream has an accepted warp.
    pub fn is_aligned(&self) -> bool {
        self.warp.is_some()
    }
}

/// A labeled interval in the reference timebase, projected from a
/// secondary stream's event marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Onset in reference-timebase seconds.
    pub onset_secs: f64,
    /// Duration in reference-timebase seconds.
    pub duration_secs: f64,
    /// Event label.
    pub label: String,
    /// True when the source time lies outside the fitted pulse span, so
    /// the projection's reliability is degraded.
    pub extrapolated: bool,
}

/// Error types for alignment operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The detector found fewer than two usable pulse onsets.
    #[error("no usable pulses: found {found} onsets, need at least 2")]
    NoPulsesFound { found: usize },

    /// The coarse correlation peak was not distinctly above the runner-up.
    #[error(
        "ambiguous alignment: best correlation {best:.3} vs second-best {second:.3} \
         (required margin {margin:.3})"
    )]
    AmbiguousAlignment { best: f64, second: f64, margin: f64 },

    /// Too few surviving pulse pairs to fit a trustworthy warp.
    #[error("insufficient matches: got {found}, need at least {required}")]
    InsufficientMatches { found: usize, required: usize },

    /// The fitted drift scale is outside the plausible range.
    #[error("implausible drift scale {scale:.6}, expected within [{min}, {max}]")]
    ImplausibleDrift { scale: f64, min: f64, max: f64 },

    /// Projection was requested on a stream with no accepted warp.
    #[error("stream '{stream_id}' has no accepted alignment")]
    UnalignedStream { stream_id: String },

    /// A signal invariant was violated.
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// The operation observed a cancellation request.
    #[error("alignment was cancelled")]
    Cancelled,
}

/// Type alias for alignment results.
pub type SyncResult<T> = Result<T, SyncError>;
