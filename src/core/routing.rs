//! Distance matrix client
//!
//! [`RoutingEngine`] is the contract a routing backend has to fulfil:
//! batched many-to-many travel times and nearest-road snapping.
//! [`DistanceMatrixClient`] sits in front of an engine and is what tile
//! workers talk to. It
//! - bounds the number of concurrent queries with a permit pool (size 1
//!   unless the engine is known to be safe for concurrent use),
//! - enforces the caller contract (no empty source or destination sets),
//! - checks the response shape before anyone reads it,
//! - optionally retries transport failures with exponential backoff.

use geo::Point;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::core::config::EngineConfig;
use crate::core::error::{Error, Result};

/// Travel-time backend bound to one road network snapshot
pub trait RoutingEngine: Send + Sync + 'static {
    /// Distance (meters) from `point` to the nearest routable road segment
    fn nearest_road(&self, point: Point<f64>) -> impl Future<Output = Result<f64>> + Send;

    /// Travel time (seconds) from every source to every destination.
    /// `None` marks an unreachable pair.
    fn travel_time_matrix(
        &self,
        sources: &[Point<f64>],
        destinations: &[Point<f64>],
    ) -> impl Future<Output = Result<Vec<Vec<Option<f64>>>>> + Send;

    /// Whether concurrent queries against this engine are safe
    fn thread_safe(&self) -> bool {
        false
    }
}

/// Validated `sources x destinations` travel-time matrix
#[derive(Debug, Clone, PartialEq)]
pub struct TravelTimeMatrix {
    rows: Vec<Vec<Option<f64>>>,
}

impl TravelTimeMatrix {
    /// Accept `rows` only if it has exactly `sources` rows of `destinations` columns
    pub fn new(rows: Vec<Vec<Option<f64>>>, sources: usize, destinations: usize) -> Result<Self> {
        if rows.len() != sources {
            return Err(Error::DataIntegrity(format!(
                "Routing engine returned {} rows for {sources} sources",
                rows.len()
            )));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != destinations) {
            return Err(Error::DataIntegrity(format!(
                "Routing engine returned {} columns in row {i} for {destinations} destinations",
                row.len()
            )));
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Fastest reachable destination per source; `None` if nothing is reachable
    pub fn row_minima(&self) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .flatten()
                    .copied()
                    .filter(|t| t.is_finite())
                    .min_by(f64::total_cmp)
            })
            .collect()
    }
}

/// Shared, bounded access to a routing engine
pub struct DistanceMatrixClient<E> {
    engine: Arc<E>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    in_flight: Arc<AtomicUsize>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl<E> Clone for DistanceMatrixClient<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            permits: Arc::clone(&self.permits),
            pool_size: self.pool_size,
            in_flight: Arc::clone(&self.in_flight),
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
        }
    }
}

impl<E: RoutingEngine> DistanceMatrixClient<E> {
    /// Create a client allowing `pool_size` concurrent queries.
    ///
    /// Engines that do not declare themselves thread-safe are always
    /// limited to one query at a time.
    pub fn new(engine: Arc<E>, pool_size: usize) -> Self {
        let pool_size = if engine.thread_safe() { pool_size.max(1) } else { 1 };
        Self {
            engine,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_retries: 0,
            retry_base_delay: Duration::from_millis(crate::core::config::DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }

    /// Create a client using the pool size and retry policy of `config`
    pub fn from_config(engine: Arc<E>, config: &EngineConfig) -> Self {
        Self::new(engine, config.engine_pool_size)
            .with_retries(config.max_retries, config.retry_base_delay())
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Effective number of concurrent queries allowed
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Queries currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Distance from `point` to the nearest road
    pub async fn nearest_road(&self, point: Point<f64>) -> Result<f64> {
        let distance = self
            .with_retry(|| async move {
                let _permit = self.acquire().await?;
                self.engine.nearest_road(point).await
            })
            .await?;
        if !distance.is_finite() {
            return Err(Error::DataIntegrity(format!(
                "Routing engine returned non-finite nearest-road distance for ({}, {})",
                point.x(),
                point.y()
            )));
        }
        Ok(distance)
    }

    /// Travel times from all `sources` to all `destinations`
    pub async fn travel_time_matrix(
        &self,
        sources: &[Point<f64>],
        destinations: &[Point<f64>],
    ) -> Result<TravelTimeMatrix> {
        if sources.is_empty() || destinations.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Travel time matrix needs sources and destinations (got {} x {})",
                sources.len(),
                destinations.len()
            )));
        }
        let rows = self
            .with_retry(|| async move {
                let _permit = self.acquire().await?;
                self.engine.travel_time_matrix(sources, destinations).await
            })
            .await?;
        TravelTimeMatrix::new(rows, sources.len(), destinations.len())
    }

    async fn acquire(&self) -> Result<InFlightPermit<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::RoutingEngine("Routing engine pool closed".to_string()))?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(InFlightPermit {
            _permit: permit,
            in_flight: &self.in_flight,
        })
    }

    /// Execute an operation, retrying transport failures with exponential backoff
    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(Error::RoutingEngine(msg)) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.retry_base_delay, attempt);
                    log::warn!(
                        "Routing engine error (attempt {attempt}): {msg}. Retrying in {}ms...",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based), doubling each time
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

struct InFlightPermit<'a> {
    _permit: SemaphorePermit<'a>,
    in_flight: &'a AtomicUsize,
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
