//! # Butterfly-access Library
//!
//! Travel-time accessibility tables: for every settlement inside a region,
//! the road-network travel time to the nearest facility of each category
//! (hospitals, banks, schools, ...) and the distance to the nearest road.
//!
//! ## Features
//!
//! - **Tiled computation**: the region is split into fixed-size square tiles
//!   that are computed independently
//! - **Adaptive facility search**: each tile queries only nearby facilities,
//!   growing the search area until enough candidates are found
//! - **Bounded concurrency**: tiles run in parallel, routing queries go
//!   through a bounded permit pool
//! - **Pluggable routing**: any [`RoutingEngine`]; an OSRM-compatible HTTP
//!   client is included
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use butterfly_access::{geojson, AccessibilityInput, Config, NoProgress};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let region = geojson::load_region(Path::new("regions.geojson"), Some("Bahia"))?;
//!     let settlements = geojson::load_settlements(Path::new("settlements.geojson"))?;
//!     let hospitals = geojson::load_facilities("hospitals", Path::new("hospitals.geojson"))?;
//!
//!     let input = AccessibilityInput::new(region, settlements, vec![hospitals]);
//!     let (table, report) = butterfly_access::compute(&input, &Config::default(), &NoProgress).await?;
//!
//!     table.write_csv(std::io::stdout())?;
//!     eprintln!("{} rows in {}", report.rows, report.elapsed_display());
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Routing Engines
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use butterfly_access::{AccessibilityEngine, EngineConfig, Point, Result, RoutingEngine};
//!
//! struct Crow;
//!
//! impl RoutingEngine for Crow {
//!     async fn nearest_road(&self, _point: Point<f64>) -> Result<f64> {
//!         Ok(0.0)
//!     }
//!
//!     async fn travel_time_matrix(
//!         &self,
//!         sources: &[Point<f64>],
//!         destinations: &[Point<f64>],
//!     ) -> Result<Vec<Vec<Option<f64>>>> {
//!         Ok(vec![vec![Some(60.0); destinations.len()]; sources.len()])
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let engine = AccessibilityEngine::new(Arc::new(Crow), EngineConfig::default())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub use crate::core::aggregate::{aggregate, ResultTable};
pub use crate::core::config::{Config, EngineConfig, RoutingConfig};
pub use crate::core::engine::{plan, AccessibilityEngine, AccessibilityReport, RunPlan, TilePlan};
pub use crate::core::error::{Error, Result};
pub use crate::core::geojson;
pub use crate::core::grid::{assign_settlements, partition, ClippedTile, Tile, TileGrid};
pub use crate::core::model::{
    AccessibilityInput, FacilityCategory, Properties, Region, ResultRow, SettlementPoint,
};
pub use crate::core::osrm::OsrmClient;
pub use crate::core::routing::{DistanceMatrixClient, RoutingEngine, TravelTimeMatrix};
pub use crate::core::scheduler::{
    ChannelSink, NoProgress, ProgressEvent, ProgressSink, Scheduler, SchedulerState, TileState,
};
pub use crate::core::search::{find_facilities, SearchOutcome, SearchParams};
pub use crate::core::worker::TileWorker;
pub use geo::Point;

// Internal modules
mod core;

/// Compute an accessibility table against the OSRM-compatible server of
/// `config.routing`
///
/// # Examples
/// ```rust,no_run
/// # use butterfly_access::{AccessibilityInput, Config, NoProgress};
/// # async fn run(input: AccessibilityInput) -> butterfly_access::Result<()> {
/// let mut config = Config::default();
/// config.routing.base_url = "http://osrm.internal:5000".to_string();
/// let (table, _) = butterfly_access::compute(&input, &config, &NoProgress).await?;
/// println!("{}", table.to_csv_string()?);
/// # Ok(())
/// # }
/// ```
pub async fn compute(
    input: &AccessibilityInput,
    config: &Config,
    sink: &dyn ProgressSink,
) -> Result<(ResultTable, AccessibilityReport)> {
    config.validate()?;
    let osrm = OsrmClient::new(&config.routing)?;
    let engine = AccessibilityEngine::new(Arc::new(osrm), config.engine.clone())?;
    engine.compute(input, sink).await
}
