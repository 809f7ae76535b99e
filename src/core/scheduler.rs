//! Bounded-concurrency tile scheduling
//!
//! Tiles run as tokio tasks, at most `concurrency` at a time. Results are
//! collected back into tile order regardless of completion order. The first
//! failing tile stops submission; tiles still in flight are detached and
//! whatever they produce is discarded.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

use crate::core::error::{Error, Result};
use crate::core::grid::ClippedTile;
use crate::core::model::{ResultRow, SettlementPoint};
use crate::core::routing::RoutingEngine;
use crate::core::worker::TileWorker;

/// Progress notifications emitted during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started,
    TileCount(usize),
    TileDone { remaining: usize },
    AllDone { rows: usize },
    Failed(String),
}

/// Fire-and-forget receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel; a closed receiver is ignored
#[derive(Debug, Clone)]
pub struct ChannelSink(pub UnboundedSender<ProgressEvent>);

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.0.send(event);
    }
}

impl From<UnboundedSender<ProgressEvent>> for ChannelSink {
    fn from(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self(sender)
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Pending,
    InFlight,
    Done,
    Errored,
}

/// A tile and the settlements assigned to it
pub type TileJob = (ClippedTile, Vec<SettlementPoint>);

pub struct Scheduler<E> {
    worker: TileWorker<E>,
    concurrency: usize,
    state: SchedulerState,
    tiles: Vec<TileState>,
}

impl<E: RoutingEngine> Scheduler<E> {
    pub fn new(worker: TileWorker<E>, concurrency: usize) -> Self {
        Self {
            worker,
            concurrency: concurrency.max(1),
            state: SchedulerState::Idle,
            tiles: Vec::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// State of every tile of the last run, in tile order
    pub fn tile_states(&self) -> &[TileState] {
        &self.tiles
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run all `jobs` and return their rows in job order
    pub async fn run(&mut self, jobs: Vec<TileJob>, sink: &dyn ProgressSink) -> Result<Vec<Vec<ResultRow>>> {
        let total = jobs.len();
        self.state = SchedulerState::Running;
        self.tiles = vec![TileState::Pending; total];
        sink.emit(ProgressEvent::Started);
        sink.emit(ProgressEvent::TileCount(total));

        let mut results: Vec<Vec<ResultRow>> = vec![Vec::new(); total];
        let mut pending = jobs.into_iter().enumerate();
        let mut running = JoinSet::new();
        let mut remaining = total;

        loop {
            while running.len() < self.concurrency {
                let Some((position, (tile, settlements))) = pending.next() else {
                    break;
                };
                self.tiles[position] = TileState::InFlight;
                let worker = self.worker.clone();
                running.spawn(async move {
                    let outcome = worker.run(&tile, settlements).await;
                    (position, tile.index(), outcome)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (position, index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => match e.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(e) => {
                        running.detach_all();
                        return Err(self.fail(sink, Error::Io(e.into())));
                    }
                },
            };

            match outcome {
                Ok(rows) => {
                    self.tiles[position] = TileState::Done;
                    results[position] = rows;
                    remaining -= 1;
                    sink.emit(ProgressEvent::TileDone { remaining });
                }
                Err(e) => {
                    self.tiles[position] = TileState::Errored;
                    running.detach_all();
                    log::error!("Tile {index} failed: {e}");
                    let err = Error::TileFailed {
                        index,
                        source: Box::new(e),
                    };
                    return Err(self.fail(sink, err));
                }
            }
        }

        self.state = SchedulerState::Completed;
        let rows = results.iter().map(Vec::len).sum();
        sink.emit(ProgressEvent::AllDone { rows });
        Ok(results)
    }

    fn fail(&mut self, sink: &dyn ProgressSink, err: Error) -> Error {
        self.state = SchedulerState::Failed;
        sink.emit(ProgressEvent::Failed(err.to_string()));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::Tile;
    use crate::core::model::{FacilityCategory, Properties};
    use crate::core::routing::DistanceMatrixClient;
    use crate::core::search::SearchParams;
    use geo::{coord, MultiPolygon, Point, Rect};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Fails matrix queries whose first source has longitude `fail_at`;
    /// queries starting at `slow_at` succeed after a delay
    struct Flaky {
        fail_at: Option<f64>,
        slow_at: Option<f64>,
        matrix_calls: AtomicUsize,
        matrices_answered: AtomicUsize,
    }

    impl Flaky {
        fn new(fail_at: Option<f64>) -> Self {
            Self {
                fail_at,
                slow_at: None,
                matrix_calls: AtomicUsize::new(0),
                matrices_answered: AtomicUsize::new(0),
            }
        }

        fn with_slow(mut self, slow_at: f64) -> Self {
            self.slow_at = Some(slow_at);
            self
        }
    }

    impl RoutingEngine for Flaky {
        async fn nearest_road(&self, _point: Point<f64>) -> Result<f64> {
            Ok(1.0)
        }

        async fn travel_time_matrix(
            &self,
            sources: &[Point<f64>],
            destinations: &[Point<f64>],
        ) -> Result<Vec<Vec<Option<f64>>>> {
            self.matrix_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_at == Some(sources[0].x()) {
                return Err(Error::RoutingEngine("connection reset".to_string()));
            }
            if self.slow_at == Some(sources[0].x()) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.matrices_answered.fetch_add(1, Ordering::SeqCst);
            Ok(vec![vec![Some(60.0); destinations.len()]; sources.len()])
        }

        fn thread_safe(&self) -> bool {
            true
        }
    }

    fn job(index: usize, settlements: usize) -> TileJob {
        let x = index as f64;
        let bounds = Rect::new(coord! { x: x, y: 0.0 }, coord! { x: x + 0.2, y: 0.2 });
        let tile = ClippedTile {
            tile: Tile { index, bounds },
            area: Some(MultiPolygon::new(vec![bounds.to_polygon()])),
        };
        let points = (0..settlements)
            .map(|i| SettlementPoint::new(index * 100 + i, Point::new(x + 0.1, 0.1), Properties::new()))
            .collect();
        (tile, points)
    }

    fn scheduler(engine: Arc<Flaky>, concurrency: usize) -> Scheduler<Flaky> {
        let categories = vec![FacilityCategory::new(
            "hospitals",
            (0..8).map(|i| Point::new(i as f64 + 0.1, 0.1)).collect(),
        )];
        let worker = TileWorker::new(
            DistanceMatrixClient::new(engine, concurrency),
            categories.into(),
            SearchParams::default(),
        );
        Scheduler::new(worker, concurrency)
    }

    #[tokio::test]
    async fn test_results_in_tile_order_with_progress() {
        let engine = Arc::new(Flaky::new(None));
        let mut scheduler = scheduler(Arc::clone(&engine), 3);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = Arc::clone(&events);
            move |event: ProgressEvent| events.lock().unwrap().push(event)
        };

        let jobs = vec![job(0, 2), job(1, 0), job(2, 3), job(3, 1)];
        let results = scheduler.run(jobs, &sink).await.unwrap();

        assert_eq!(results.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 0, 3, 1]);
        assert_eq!(results[2][0].settlement_id, 200);
        assert_eq!(scheduler.state(), SchedulerState::Completed);
        assert!(scheduler.tile_states().iter().all(|s| *s == TileState::Done));
        assert_eq!(engine.matrix_calls.load(Ordering::SeqCst), 3);

        let events = events.lock().unwrap();
        assert_eq!(events[0], ProgressEvent::Started);
        assert_eq!(events[1], ProgressEvent::TileCount(4));
        let done: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::TileDone { remaining } => Some(*remaining),
                _ => None,
            })
            .collect();
        assert_eq!(done, vec![3, 2, 1, 0]);
        assert_eq!(events.last(), Some(&ProgressEvent::AllDone { rows: 6 }));
    }

    #[tokio::test]
    async fn test_first_failure_stops_submission() {
        let engine = Arc::new(Flaky::new(Some(0.1)));
        let mut scheduler = scheduler(Arc::clone(&engine), 1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let jobs = vec![job(0, 1), job(1, 1), job(2, 1)];
        let err = scheduler.run(jobs, &ChannelSink::from(tx)).await.unwrap_err();

        assert!(matches!(err, Error::TileFailed { index: 0, .. }));
        assert!(err.is_routing_failure());
        assert_eq!(scheduler.state(), SchedulerState::Failed);
        assert_eq!(
            scheduler.tile_states(),
            &[TileState::Errored, TileState::Pending, TileState::Pending]
        );
        assert_eq!(engine.matrix_calls.load(Ordering::SeqCst), 1);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(ProgressEvent::Failed(_))));
    }

    #[tokio::test]
    async fn test_failure_discards_tiles_in_flight() {
        let engine = Arc::new(Flaky::new(Some(1.1)).with_slow(0.1));
        let mut scheduler = scheduler(Arc::clone(&engine), 2);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = Arc::clone(&events);
            move |event: ProgressEvent| events.lock().unwrap().push(event)
        };

        let jobs = vec![job(0, 2), job(1, 1), job(2, 1)];
        let err = scheduler.run(jobs, &sink).await.unwrap_err();

        assert!(matches!(err, Error::TileFailed { index: 1, .. }));
        assert_eq!(scheduler.state(), SchedulerState::Failed);
        assert_eq!(
            scheduler.tile_states(),
            &[TileState::InFlight, TileState::Errored, TileState::Pending]
        );
        assert_eq!(engine.matrices_answered.load(Ordering::SeqCst), 0);

        // The detached sibling still runs to completion; nothing collects it
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.matrices_answered.load(Ordering::SeqCst), 1);
        assert_eq!(engine.matrix_calls.load(Ordering::SeqCst), 2);

        let events = events.lock().unwrap();
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::AllDone { .. })));
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::TileDone { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Failed(_))));
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_affect_run() {
        let engine = Arc::new(Flaky::new(None));
        let mut scheduler = scheduler(engine, 2);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let results = scheduler.run(vec![job(0, 2)], &ChannelSink(tx)).await.unwrap();
        assert_eq!(results[0].len(), 2);
    }

    #[tokio::test]
    async fn test_no_jobs_completes_immediately() {
        let mut scheduler = scheduler(Arc::new(Flaky::new(None)), 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let results = scheduler.run(Vec::new(), &NoProgress).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Completed);
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        assert_eq!(scheduler(Arc::new(Flaky::new(None)), 0).concurrency(), 1);
    }
}
