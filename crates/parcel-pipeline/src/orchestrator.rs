//! The rectangle loop.
//!
//! Rectangles are processed strictly one after another: query, decode,
//! validate geometry, accumulate. A rectangle that fails at any step
//! contributes nothing and the loop moves on, unless the failure streak
//! reaches `max_consecutive_failures`, which is treated as systemic (a
//! wrong key or a revoked token fails every rectangle the same way).
//!
//! Whatever ends the loop (exhausted source, id cutoff, cancellation,
//! or systemic escalation) the accumulated batch is persisted exactly
//! once before the run returns.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use parcel_client::{QueryClient, QueryError};
use parcel_core::{Feature, QueryRectangle};
use parcel_crypto::{DecodedPayload, PayloadDecryptor, PayloadError};
use parcel_store::{ConversionReport, ParcelStore, WriteReport};

use crate::error::{PipelineError, RectangleError};
use crate::progress::{CancelSignal, PipelineState, ProgressEvent, ProgressSink, TracingSink};

/// Default failure streak treated as systemic.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Source of raw encrypted payloads, one per rectangle.
pub trait RectangleQuery {
    fn query(
        &self,
        rect: &QueryRectangle,
    ) -> impl Future<Output = Result<String, QueryError>> + Send;
}

impl RectangleQuery for QueryClient {
    fn query(
        &self,
        rect: &QueryRectangle,
    ) -> impl Future<Output = Result<String, QueryError>> + Send {
        self.fetch(rect)
    }
}

/// Turns a raw payload into features.
pub trait PayloadDecoder {
    fn decode(&self, payload: &str) -> Result<DecodedPayload, PayloadError>;
}

impl PayloadDecoder for PayloadDecryptor {
    fn decode(&self, payload: &str) -> Result<DecodedPayload, PayloadError> {
        PayloadDecryptor::decode(self, payload)
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub rectangles_attempted: usize,
    pub rectangles_failed: usize,
    /// Features decoded from successful rectangles, before deduplication.
    pub features_fetched: usize,
    pub write: Option<WriteReport>,
    pub conversion: Option<ConversionReport>,
    pub cancelled: bool,
}

/// Drives rectangles through query → decode → accumulate, then persists.
pub struct Orchestrator<Q, D> {
    query: Q,
    decoder: D,
    store: ParcelStore,
    shapefile_output: Option<PathBuf>,
    max_consecutive_failures: u32,
    max_rectangle_id: Option<u64>,
    cancel: CancelSignal,
    sink: Arc<dyn ProgressSink>,
    state: PipelineState,
}

impl<Q: RectangleQuery, D: PayloadDecoder> Orchestrator<Q, D> {
    pub fn new(query: Q, decoder: D, store: ParcelStore) -> Self {
        Self {
            query,
            decoder,
            store,
            shapefile_output: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_rectangle_id: None,
            cancel: CancelSignal::new(),
            sink: Arc::new(TracingSink),
            state: PipelineState::Idle,
        }
    }

    /// Convert the store to a Shapefile at `path` after persisting.
    pub fn with_shapefile_output(mut self, path: Option<PathBuf>) -> Self {
        self.shapefile_output = path;
        self
    }

    /// Failure streak that aborts the run. Zero is treated as one.
    pub fn with_max_consecutive_failures(mut self, limit: u32) -> Self {
        self.max_consecutive_failures = limit.max(1);
        self
    }

    /// Stop after the rectangle whose id reaches `id`.
    pub fn with_max_rectangle_id(mut self, id: Option<u64>) -> Self {
        self.max_rectangle_id = id;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn store(&self) -> &ParcelStore {
        &self.store
    }

    /// Process every rectangle from `rectangles`, then persist and convert.
    pub async fn run<I>(&mut self, rectangles: I) -> Result<RunReport, PipelineError>
    where
        I: IntoIterator<Item = QueryRectangle>,
    {
        let mut report = RunReport::default();
        let mut accumulated: Vec<Feature> = Vec::new();
        let mut consecutive = 0u32;
        let mut systemic: Option<String> = None;

        for (offset, rect) in rectangles.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                self.sink.record(&ProgressEvent::Cancelled {
                    completed: offset,
                    accumulated: accumulated.len(),
                });
                break;
            }

            let index = offset + 1;
            report.rectangles_attempted += 1;
            self.sink
                .record(&ProgressEvent::RectangleStarted { index, rect: &rect });

            match self.process(&rect).await {
                Ok(decoded) => {
                    consecutive = 0;
                    let features = decoded.features.len();
                    report.features_fetched += features;
                    accumulated.extend(decoded.features);
                    self.sink.record(&ProgressEvent::RectangleSucceeded {
                        index,
                        rect: &rect,
                        features,
                        skipped: decoded.skipped,
                        accumulated: accumulated.len(),
                    });
                }
                Err(error) => {
                    consecutive += 1;
                    report.rectangles_failed += 1;
                    self.sink.record(&ProgressEvent::RectangleFailed {
                        index,
                        rect: &rect,
                        error: &error,
                        consecutive,
                    });
                    if consecutive >= self.max_consecutive_failures {
                        systemic = Some(error.to_string());
                        break;
                    }
                }
            }

            if let (Some(max), Some(id)) = (self.max_rectangle_id, rect.id) {
                if id >= max {
                    self.sink.record(&ProgressEvent::CutoffReached { id });
                    break;
                }
            }
        }

        self.transition(PipelineState::Persisting);
        let store = self.store.clone();
        let write = run_blocking("persist", move || store.write_features(&accumulated)).await??;
        self.sink.record(&ProgressEvent::Persisted(&write));
        report.write = Some(write);

        if let Some(last_error) = systemic {
            return Err(PipelineError::Systemic {
                consecutive,
                last_error,
                persisted: Some(write),
            });
        }

        if self.shapefile_output.is_some() {
            self.transition(PipelineState::Converting);
            let source = self.store.path().to_path_buf();
            let target = self.shapefile_output.clone();
            let conversion = run_blocking("convert", move || {
                parcel_store::convert(Some(source.as_path()), target.as_deref())
            })
            .await??;
            if let Some(conversion) = &conversion {
                self.sink.record(&ProgressEvent::Converted(conversion));
            }
            report.conversion = conversion;
        }

        self.transition(PipelineState::Done);
        Ok(report)
    }

    async fn process(&mut self, rect: &QueryRectangle) -> Result<DecodedPayload, RectangleError> {
        self.transition(PipelineState::Querying);
        let payload = self.query.query(rect).await?;

        self.transition(PipelineState::Decrypting);
        let decoded = self.decoder.decode(&payload)?;

        // Reject the whole rectangle rather than persist a truncated polygon.
        self.transition(PipelineState::Accumulating);
        for feature in &decoded.features {
            feature
                .geometry
                .to_polygon()
                .map_err(|source| RectangleError::Geometry {
                    id: feature.id,
                    source,
                })?;
        }
        Ok(decoded)
    }

    fn transition(&mut self, state: PipelineState) {
        self.state = state;
        self.sink.record(&ProgressEvent::StateChanged(state));
    }
}

/// Run file-bound work (rayon geometry building, shapefile writing) off
/// the async worker threads.
async fn run_blocking<T, F>(stage: &'static str, work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::Task {
            stage,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::{FeatureGeometry, RawPoint};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn square(id: i64) -> Feature {
        let x = id as f64;
        Feature::new(
            id,
            FeatureGeometry::single_ring(vec![
                RawPoint::new(x, 0.0),
                RawPoint::new(x + 1.0, 0.0),
                RawPoint::new(x + 1.0, 1.0),
                RawPoint::new(x, 1.0),
                RawPoint::new(x, 0.0),
            ]),
        )
    }

    /// Responds per rectangle id: `Ok(payload)` or a 503.
    struct FakeQuery {
        responses: HashMap<u64, Result<String, u16>>,
        calls: Mutex<Vec<u64>>,
        cancel_after: Option<(u64, CancelSignal)>,
    }

    impl FakeQuery {
        fn new(responses: impl IntoIterator<Item = (u64, Result<&'static str, u16>)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(id, r)| (id, r.map(str::to_string)))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                cancel_after: None,
            }
        }

        fn calls(&self) -> Vec<u64> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RectangleQuery for &FakeQuery {
        fn query(
            &self,
            rect: &QueryRectangle,
        ) -> impl Future<Output = Result<String, QueryError>> + Send {
            let id = rect.id.unwrap_or_default();
            self.calls.lock().unwrap().push(id);
            if let Some((at, signal)) = &self.cancel_after {
                if *at == id {
                    signal.cancel();
                }
            }
            let result = match self.responses.get(&id) {
                Some(Ok(payload)) => Ok(payload.clone()),
                Some(Err(status)) => Err(QueryError::Status {
                    endpoint: "fake".into(),
                    status: *status,
                    body: String::new(),
                }),
                None => Ok(String::new()),
            };
            std::future::ready(result)
        }
    }

    /// Payload text is a comma-separated id list; `bad` fails decryption,
    /// `broken:<id>` yields a feature with a malformed geometry.
    struct FakeDecoder;

    impl PayloadDecoder for FakeDecoder {
        fn decode(&self, payload: &str) -> Result<DecodedPayload, PayloadError> {
            if payload == "bad" {
                return Err(PayloadError::Decryption("wrong key".into()));
            }
            let mut decoded = DecodedPayload::default();
            for token in payload.split(',').filter(|t| !t.is_empty()) {
                if let Some(id) = token.strip_prefix("broken:") {
                    let mut f = square(id.parse().unwrap());
                    f.geometry.parts = vec![9];
                    decoded.features.push(f);
                } else {
                    decoded.features.push(square(token.parse().unwrap()));
                }
            }
            Ok(decoded)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        states: Mutex<Vec<PipelineState>>,
        failures: Mutex<Vec<usize>>,
        cancelled: Mutex<Option<usize>>,
    }

    impl ProgressSink for RecordingSink {
        fn record(&self, event: &ProgressEvent<'_>) {
            match event {
                ProgressEvent::StateChanged(s) => self.states.lock().unwrap().push(*s),
                ProgressEvent::RectangleFailed { index, .. } => {
                    self.failures.lock().unwrap().push(*index)
                }
                ProgressEvent::Cancelled { completed, .. } => {
                    *self.cancelled.lock().unwrap() = Some(*completed)
                }
                _ => {}
            }
        }
    }

    fn rects(ids: impl IntoIterator<Item = u64>) -> Vec<QueryRectangle> {
        ids.into_iter()
            .map(|id| QueryRectangle::new(0.0, 1.0, 1.0, 0.0).with_id(id))
            .collect()
    }

    fn store(dir: &TempDir) -> ParcelStore {
        ParcelStore::open(dir.path().join("out.geojson")).with_workers(1)
    }

    #[tokio::test]
    async fn accumulates_across_rectangles_and_persists_once() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([(1, Ok("1,2")), (2, Ok("2,3")), (3, Ok(""))]);
        let sink = Arc::new(RecordingSink::default());
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir)).with_sink(sink.clone());

        let report = orch.run(rects(1..=3)).await.unwrap();
        assert_eq!(report.rectangles_attempted, 3);
        assert_eq!(report.rectangles_failed, 0);
        assert_eq!(report.features_fetched, 4);
        let write = report.write.unwrap();
        assert_eq!(write.appended, 3);
        assert_eq!(write.duplicates_in_batch, 1);
        assert_eq!(orch.state(), PipelineState::Done);

        let states = sink.states.lock().unwrap().clone();
        assert_eq!(
            &states[..3],
            &[
                PipelineState::Querying,
                PipelineState::Decrypting,
                PipelineState::Accumulating
            ]
        );
        assert_eq!(
            states.iter().filter(|s| **s == PipelineState::Persisting).count(),
            1
        );
        assert_eq!(states.last(), Some(&PipelineState::Done));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn persistence_runs_off_the_runtime_thread() {
        let runtime_thread = std::thread::current().id();
        let worker = run_blocking("persist", || std::thread::current().id())
            .await
            .unwrap();
        assert_ne!(worker, runtime_thread);

        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([(1, Ok("1,2"))]);
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir));
        let report = orch.run(rects(1..=1)).await.unwrap();
        assert_eq!(report.write.unwrap().appended, 2);
    }

    #[tokio::test]
    async fn panicking_blocking_work_is_a_task_error() {
        let err = run_blocking("convert", || -> usize { panic!("writer crashed") })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Task { stage: "convert", .. }));
    }

    #[tokio::test]
    async fn failed_rectangle_is_dropped_and_loop_continues() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([(1, Ok("1")), (2, Err(503)), (3, Ok("bad")), (4, Ok("4"))]);
        let sink = Arc::new(RecordingSink::default());
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir)).with_sink(sink.clone());

        let report = orch.run(rects(1..=4)).await.unwrap();
        assert_eq!(report.rectangles_attempted, 4);
        assert_eq!(report.rectangles_failed, 2);
        assert_eq!(*sink.failures.lock().unwrap(), vec![2, 3]);
        let ids = orch.store().existing_ids().unwrap();
        assert_eq!(ids, HashSet::from([1, 4]));
    }

    #[tokio::test]
    async fn geometry_error_drops_the_whole_rectangle() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([(1, Ok("1,broken:2")), (2, Ok("3"))]);
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir));

        let report = orch.run(rects(1..=2)).await.unwrap();
        assert_eq!(report.rectangles_failed, 1);
        let ids = orch.store().existing_ids().unwrap();
        assert_eq!(ids, HashSet::from([3]));
    }

    #[tokio::test]
    async fn consecutive_failures_escalate_after_persisting() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([
            (1, Ok("1,2")),
            (2, Ok("bad")),
            (3, Ok("bad")),
            (4, Ok("bad")),
            (5, Ok("5")),
        ]);
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir));

        let err = orch.run(rects(1..=5)).await.unwrap_err();
        match err {
            PipelineError::Systemic {
                consecutive,
                persisted,
                ..
            } => {
                assert_eq!(consecutive, 3);
                assert_eq!(persisted.unwrap().appended, 2);
            }
            other => panic!("expected systemic error, got {other:?}"),
        }
        assert_eq!(query.calls(), vec![1, 2, 3, 4]);
        assert_eq!(orch.store().existing_ids().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn a_success_resets_the_failure_streak() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([
            (1, Ok("bad")),
            (2, Ok("bad")),
            (3, Ok("3")),
            (4, Ok("bad")),
            (5, Ok("bad")),
        ]);
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir));
        let report = orch.run(rects(1..=5)).await.unwrap();
        assert_eq!(report.rectangles_failed, 4);
    }

    #[tokio::test]
    async fn cancel_after_k_persists_partial_batch() {
        let dir = TempDir::new().unwrap();
        let cancel = CancelSignal::new();
        let mut query = FakeQuery::new([(1, Ok("1")), (2, Ok("2")), (3, Ok("3")), (4, Ok("4"))]);
        query.cancel_after = Some((2, cancel.clone()));
        let sink = Arc::new(RecordingSink::default());
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir))
            .with_cancel_signal(cancel)
            .with_sink(sink.clone());

        let report = orch.run(rects(1..=4)).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.rectangles_attempted, 2);
        assert_eq!(query.calls(), vec![1, 2]);
        assert_eq!(*sink.cancelled.lock().unwrap(), Some(2));
        let ids = orch.store().existing_ids().unwrap();
        assert_eq!(ids, HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn cancel_before_start_still_creates_store() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([(1, Ok("1"))]);
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir));
        orch.cancel_signal().cancel();

        let report = orch.run(rects(1..=1)).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.rectangles_attempted, 0);
        assert!(query.calls().is_empty());
        assert_eq!(report.write.unwrap().total_records, 0);
    }

    #[tokio::test]
    async fn max_rectangle_id_stops_the_loop() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([(1, Ok("1")), (2, Ok("2")), (3, Ok("3"))]);
        let mut orch =
            Orchestrator::new(&query, FakeDecoder, store(&dir)).with_max_rectangle_id(Some(2));

        let report = orch.run(rects(1..=3)).await.unwrap();
        assert_eq!(report.rectangles_attempted, 2);
        assert_eq!(query.calls(), vec![1, 2]);
    }

    #[tokio::test]
    async fn converts_when_shapefile_output_set() {
        let dir = TempDir::new().unwrap();
        let query = FakeQuery::new([(1, Ok("1,2"))]);
        let shp = dir.path().join("shp/out.shp");
        let mut orch = Orchestrator::new(&query, FakeDecoder, store(&dir))
            .with_shapefile_output(Some(shp.clone()));

        let report = orch.run(rects(1..=1)).await.unwrap();
        assert_eq!(report.conversion.unwrap().records, 2);
        assert!(shp.is_file());
    }
}
