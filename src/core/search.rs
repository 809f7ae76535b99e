//! Adaptive facility search around a tile
//!
//! A facility is a candidate destination for a tile when it lies inside the
//! tile's search buffer: the clipped tile grown outward by the distance that
//! can be covered at `max_speed_kmh` during the time budget. The budget starts
//! at `max_time_secs` and grows by `buffer_step_secs` until the buffer holds
//! `min(category size, min_facilities)` points.
//!
//! Rather than looping until enough points show up, the number of growth
//! steps is derived from the distance of the k-th closest facility. That
//! distance is finite for every facility, so the step count is finite and
//! the search always terminates, including for categories with fewer than
//! `min_facilities` points.

use geo::{Closest, ClosestPoint, HaversineDistance, Intersects, MultiPolygon, Point};

use crate::core::config::EngineConfig;

/// Buffer distance in kilometers reachable in `time_secs` at `speed_kmh`
pub fn buffer_distance_km(time_secs: f64, speed_kmh: f64) -> f64 {
    (time_secs / 3600.0) * speed_kmh
}

/// Parameters of the buffer growth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub max_time_secs: f64,
    pub max_speed_kmh: f64,
    pub buffer_step_secs: f64,
    pub min_facilities: usize,
}

impl From<&EngineConfig> for SearchParams {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_time_secs: config.max_time_secs,
            max_speed_kmh: config.max_speed_kmh,
            buffer_step_secs: config.buffer_step_secs,
            min_facilities: config.min_facilities,
        }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Facilities selected for one tile and category
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Selected points, in category order
    pub facilities: Vec<Point<f64>>,
    /// Time budget of the final buffer (seconds)
    pub time_secs: f64,
    /// Number of times the buffer had to grow
    pub steps: u64,
}

/// Select facilities of one category for a clipped tile
pub fn find_facilities(
    area: &MultiPolygon<f64>,
    points: &[Point<f64>],
    params: &SearchParams,
) -> SearchOutcome {
    let distances: Vec<f64> = points.iter().map(|p| distance_km(area, p)).collect();

    let mut reachable: Vec<f64> = distances.iter().copied().filter(|d| d.is_finite()).collect();
    let min_count = reachable.len().min(params.min_facilities);

    // Distance the buffer must reach to hold `min_count` points
    let required = if min_count == 0 {
        0.0
    } else {
        let (_, kth, _) = reachable.select_nth_unstable_by(min_count - 1, f64::total_cmp);
        *kth
    };

    let initial = buffer_distance_km(params.max_time_secs, params.max_speed_kmh);
    let step = buffer_distance_km(params.buffer_step_secs, params.max_speed_kmh);
    let steps = if required <= initial {
        0
    } else {
        ((required - initial) / step).ceil() as u64
    };

    let time_secs = params.max_time_secs + steps as f64 * params.buffer_step_secs;
    // max() absorbs float rounding in the step computation
    let radius = buffer_distance_km(time_secs, params.max_speed_kmh).max(required);

    let facilities = points
        .iter()
        .zip(&distances)
        .filter(|(_, d)| **d <= radius)
        .map(|(p, _)| *p)
        .collect();

    SearchOutcome {
        facilities,
        time_secs,
        steps,
    }
}

/// Great-circle distance from `point` to the nearest part of `area`, in km
fn distance_km(area: &MultiPolygon<f64>, point: &Point<f64>) -> f64 {
    if area.intersects(point) {
        return 0.0;
    }
    match area.closest_point(point) {
        Closest::Intersection(_) => 0.0,
        Closest::SinglePoint(closest) => closest.haversine_distance(point) / 1000.0,
        Closest::Indeterminate => f64::INFINITY,
    }
}
