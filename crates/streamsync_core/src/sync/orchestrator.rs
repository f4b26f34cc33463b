//! Session orchestration for multi-stream alignment.
//!
//! The orchestrator owns the one piece of shared state in the engine:
//! the immutable reference pulse train (computed once) and the
//! append-only collection of per-stream results. Stream alignment itself
//! is a pure computation over a stream's own data plus the read-only
//! reference, so a batch of streams is processed in parallel with only
//! the result append serialized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::SyncSettings;

use super::detector;
use super::estimator;
use super::matcher;
use super::projector;
use super::types::{
    Annotation, EventMarker, ReferenceStream, SecondaryStream, Signal, StreamSyncResult,
    SyncError, SyncResult,
};

/// Handle for cooperatively cancelling in-flight alignment work.
///
/// The matcher's offset search observes the flag between candidates, so
/// cancellation takes effect at the next candidate boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Coordinates detection, matching, and fitting across secondary streams
/// against one reference, and exposes projection over the results.
pub struct SyncOrchestrator {
    settings: SyncSettings,
    reference: Option<ReferenceStream>,
    results: Mutex<Vec<StreamSyncResult>>,
    cancelled: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    /// Create a session with the given settings.
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            reference: None,
            results: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Designate the canonical timebase and detect its pulse train.
    ///
    /// Fails loudly: without a reference train nothing downstream is
    /// meaningful, so errors here are not converted into failed results.
    /// The reference is immutable once set.
    pub fn set_reference(&mut self, signal: Signal) -> SyncResult<()> {
        if self.reference.is_some() {
            return Err(SyncError::InvalidSignal(
                "reference stream already set for this session".into(),
            ));
        }
        let pulses = detector::detect(&signal, &self.settings.detector)?;
        tracing::info!(
            pulses = pulses.len(),
            span_secs = pulses.span_secs(),
            "reference pulse train established"
        );
        self.reference = Some(ReferenceStream { signal, pulses });
        Ok(())
    }

    /// The reference stream, once set.
    pub fn reference(&self) -> Option<&ReferenceStream> {
        self.reference.as_ref()
    }

    /// Get a handle that cancels this session's in-flight alignment.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    /// Align one secondary stream and record its result.
    ///
    /// Never fails for data-quality reasons: every alignment error is
    /// caught and recorded as a failed result so one bad stream cannot
    /// abort a batch. Re-adding a stream id replaces its prior result in
    /// place.
    pub fn add_stream(&self, stream: &SecondaryStream) -> StreamSyncResult {
        let result = self.align_stream(stream);
        self.record(&result);
        result
    }

    /// Align a batch of streams in parallel.
    ///
    /// Streams have no data dependency on one another; each worker reads
    /// the immutable reference and only the result append is serialized.
    /// Results are returned and recorded in input order.
    pub fn add_streams(&self, streams: &[SecondaryStream]) -> Vec<StreamSyncResult> {
        let results: Vec<StreamSyncResult> =
            streams.par_iter().map(|s| self.align_stream(s)).collect();
        for result in &results {
            self.record(result);
        }
        results
    }

    /// Every added stream's result, in the order streams were added.
    pub fn report(&self) -> Vec<StreamSyncResult> {
        self.results.lock().clone()
    }

    /// Project a stream's event markers into reference-timebase
    /// annotations.
    ///
    /// Fails with `UnalignedStream` for unknown stream ids and for
    /// streams whose alignment failed; projecting without an accepted
    /// warp is a caller error, not a data-quality issue.
    pub fn project_stream(
        &self,
        stream_id: &str,
        events: &[EventMarker],
    ) -> SyncResult<Vec<Annotation>> {
        let results = self.results.lock();
        let aligned = results
            .iter()
            .find(|r| r.stream_id == stream_id)
            .and_then(|r| r.warp.map(|warp| (warp, r.sample_rate)));
        match aligned {
            Some((warp, sample_rate)) => Ok(projector::project_markers(&warp, sample_rate, events)),
            None => Err(SyncError::UnalignedStream {
                stream_id: stream_id.to_string(),
            }),
        }
    }

    /// Run detect → match → fit for one stream.
    fn align_stream(&self, stream: &SecondaryStream) -> StreamSyncResult {
        let sample_rate = stream.pulse_signal.sample_rate;
        let Some(reference) = &self.reference else {
            return StreamSyncResult::failed(&stream.id, sample_rate, "no reference stream set");
        };

        tracing::info!(stream = %stream.id, "aligning stream against reference");
        let cancel = self.cancel_handle();

        let outcome = detector::detect(&stream.pulse_signal, &self.settings.detector)
            .and_then(|train| {
                matcher::match_trains(&reference.pulses, &train, &self.settings.matcher, &cancel)
            })
            .and_then(|train_match| {
                estimator::fit(&train_match.matches, &self.settings.estimator)
            });

        match outcome {
            Ok(fit) => {
                tracing::info!(
                    stream = %stream.id,
                    scale = fit.warp.scale,
                    offset_secs = fit.warp.offset_secs,
                    matches = fit.match_count,
                    confidence = %fit.confidence,
                    "stream aligned"
                );
                StreamSyncResult::aligned(
                    &stream.id,
                    sample_rate,
                    fit.warp,
                    fit.match_count,
                    fit.residual_stddev,
                    fit.confidence,
                )
            }
            Err(err) => {
                tracing::warn!(stream = %stream.id, error = %err, "stream alignment failed");
                StreamSyncResult::failed(&stream.id, sample_rate, err.to_string())
            }
        }
    }

    /// Record a result, replacing any prior entry for the same stream id.
    fn record(&self, result: &StreamSyncResult) {
        let mut results = self.results.lock();
        match results.iter_mut().find(|r| r.stream_id == result.stream_id) {
            Some(slot) => *slot = result.clone(),
            None => results.push(result.clone()),
        }
    }
}
