//! Progress aggregation and throttled snapshot emission
//!
//! `ProgressTracker` is the single mutual-exclusion boundary of a document
//! run: the `PipelineState`, the per-stage item counters and the extraction
//! totals all live behind one `parking_lot::Mutex`. Workers update it through
//! short critical sections and never hold the lock across an await.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use super::state::PipelineState;
use crate::error::Error;
use crate::types::{ExtractionOutcome, Severity, Stage, StageStatus};

/// Item counters of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounters {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StageCounters {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Per-stage part of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub status: StageStatus,
    pub processed: usize,
    pub total: usize,
    /// Finished run time, or time so far while running
    pub duration_ms: Option<u64>,
}

/// Point-in-time view of a document's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub document_id: Uuid,
    pub stages: BTreeMap<Stage, StageSnapshot>,
    pub entities: usize,
    pub relations: usize,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: Option<u64>,
    /// Weighted overall progress in `[0.0, 1.0]`
    pub progress: f64,
    pub status: StageStatus,
}

impl ProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Receiver of progress snapshots
pub trait ProgressSink: Send + Sync {
    fn emit(&self, snapshot: &ProgressSnapshot);
}

/// Publishes the latest snapshot on a `tokio::sync::watch` channel
pub struct WatchProgressSink {
    tx: watch::Sender<Option<ProgressSnapshot>>,
}

impl WatchProgressSink {
    pub fn new() -> (Self, watch::Receiver<Option<ProgressSnapshot>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ProgressSnapshot>> {
        self.tx.subscribe()
    }
}

impl ProgressSink for WatchProgressSink {
    fn emit(&self, snapshot: &ProgressSnapshot) {
        self.tx.send_replace(Some(snapshot.clone()));
    }
}

/// Logs every snapshot it receives
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn emit(&self, snapshot: &ProgressSnapshot) {
        tracing::info!(
            document_id = %snapshot.document_id,
            status = %snapshot.status,
            progress = %format!("{:.1}%", snapshot.progress * 100.0),
            entities = snapshot.entities,
            relations = snapshot.relations,
            elapsed_ms = snapshot.elapsed_ms,
            "Pipeline progress"
        );
    }
}

/// Drops snapshots arriving faster than `min_interval`.
///
/// Forced emissions (terminal snapshots) always go through.
pub struct ThrottledEmitter {
    sink: Arc<dyn ProgressSink>,
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ThrottledEmitter {
    pub fn new(sink: Arc<dyn ProgressSink>, min_interval: Duration) -> Self {
        Self {
            sink,
            min_interval,
            last_emit: Mutex::new(None),
        }
    }

    /// Returns whether the snapshot was passed to the sink
    pub fn emit(&self, snapshot: &ProgressSnapshot, force: bool) -> bool {
        let now = Instant::now();
        {
            let mut last = self.last_emit.lock();
            let due = match *last {
                Some(at) => now.duration_since(at) >= self.min_interval,
                None => true,
            };
            if !force && !due {
                return false;
            }
            *last = Some(now);
        }
        self.sink.emit(snapshot);
        true
    }
}

struct TrackerInner {
    state: PipelineState,
    counters: BTreeMap<Stage, StageCounters>,
    outcome: ExtractionOutcome,
}

/// Shared progress of one document run
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<TrackerInner>>,
    emitter: Option<Arc<ThrottledEmitter>>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(state: PipelineState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner {
                state,
                counters: BTreeMap::new(),
                outcome: ExtractionOutcome::default(),
            })),
            emitter: None,
            started: Instant::now(),
        }
    }

    pub fn with_emitter(mut self, emitter: ThrottledEmitter) -> Self {
        self.emitter = Some(Arc::new(emitter));
        self
    }

    /// Run `f` against the pipeline state under the lock
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PipelineState) -> R) -> R {
        f(&mut self.inner.lock().state)
    }

    /// Clone of the current pipeline state
    pub fn state(&self) -> PipelineState {
        self.inner.lock().state.clone()
    }

    pub fn document_id(&self) -> Uuid {
        self.inner.lock().state.document_id
    }

    /// Reset counters of `stage` for a fresh run over `total` items
    pub fn begin_items(&self, stage: Stage, total: usize) {
        self.inner.lock().counters.insert(
            stage,
            StageCounters {
                total,
                ..Default::default()
            },
        );
    }

    /// Update the expected item count without touching processed counts
    pub fn set_total(&self, stage: Stage, total: usize) {
        self.inner.lock().counters.entry(stage).or_default().total = total;
    }

    pub fn record_success(&self, stage: Stage) {
        self.inner.lock().counters.entry(stage).or_default().succeeded += 1;
    }

    /// Count a failed item and append its error to the state
    pub fn record_failure(&self, stage: Stage, error: &Error) {
        let mut inner = self.inner.lock();
        inner.counters.entry(stage).or_default().failed += 1;
        inner.state.record_error(stage, error.to_string(), error.severity());
    }

    /// Count a failed item whose error is recorded elsewhere
    pub fn count_failed(&self, stage: Stage) {
        self.inner.lock().counters.entry(stage).or_default().failed += 1;
    }

    /// Count `n` failed items sharing one error (a rejected batch)
    pub fn record_failures(&self, stage: Stage, n: usize, error: &Error) {
        if n == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.counters.entry(stage).or_default().failed += n;
        inner
            .state
            .record_error(stage, format!("{} ({} items)", error, n), error.severity());
    }

    pub fn record_warning(&self, stage: Stage, message: impl Into<String>) {
        self.inner
            .lock()
            .state
            .record_error(stage, message, Severity::Warning);
    }

    pub fn add_outcome(&self, outcome: ExtractionOutcome) {
        self.inner.lock().outcome += outcome;
    }

    pub fn outcome(&self) -> ExtractionOutcome {
        self.inner.lock().outcome
    }

    pub fn counters(&self, stage: Stage) -> StageCounters {
        self.inner.lock().counters.get(&stage).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.elapsed();
        let now = chrono::Utc::now();
        let inner = self.inner.lock();

        let stages = inner
            .state
            .stages()
            .map(|(stage, record)| {
                let counters = inner.counters.get(&stage).copied().unwrap_or_default();
                let duration_ms = match (record.status, record.started_at) {
                    (StageStatus::Running, Some(start)) => {
                        Some((now - start).num_milliseconds().max(0) as u64)
                    }
                    _ => record.duration_ms(),
                };
                (
                    stage,
                    StageSnapshot {
                        status: record.status,
                        processed: counters.processed(),
                        total: counters.total,
                        duration_ms,
                    },
                )
            })
            .collect();

        let progress = inner.state.overall_progress();
        let elapsed_ms = elapsed.as_millis() as u64;
        ProgressSnapshot {
            document_id: inner.state.document_id,
            stages,
            entities: inner.outcome.entities,
            relations: inner.outcome.relations,
            elapsed_ms,
            estimated_remaining_ms: estimate_remaining(elapsed_ms, progress),
            progress,
            status: inner.state.document_status(),
        }
    }

    /// Build a snapshot and hand it to the emitter, if any
    pub fn publish(&self, force: bool) {
        if let Some(emitter) = &self.emitter {
            let snapshot = self.snapshot();
            let force = force || snapshot.is_terminal();
            emitter.emit(&snapshot, force);
        }
    }
}

/// Linear extrapolation from the progress made so far
fn estimate_remaining(elapsed_ms: u64, progress: f64) -> Option<u64> {
    if progress >= 1.0 {
        Some(0)
    } else if progress > 0.0 {
        Some((elapsed_ms as f64 * (1.0 - progress) / progress).round() as u64)
    } else {
        None
    }
}
