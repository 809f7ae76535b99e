//! End-to-end accessibility computation
//!
//! Validation, tiling and settlement assignment happen up front, so
//! geometry and configuration errors surface before any routing call.

use geo::Rect;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::aggregate::{aggregate, ResultTable};
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::grid::{assign_settlements, partition};
use crate::core::model::AccessibilityInput;
use crate::core::routing::{DistanceMatrixClient, RoutingEngine};
use crate::core::scheduler::{ProgressSink, Scheduler};
use crate::core::search::SearchParams;
use crate::core::worker::TileWorker;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct AccessibilityReport {
    pub region: String,
    pub tiles: usize,
    pub empty_tiles: usize,
    /// Settlements that fell inside the region
    pub settlements: usize,
    pub rows: usize,
    pub elapsed: Duration,
}

impl AccessibilityReport {
    /// Elapsed time in seconds, or minutes once past one minute
    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed)
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        format!("{:.1} min", secs / 60.0)
    }
}

/// One tile of a dry run
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub index: usize,
    pub bounds: Rect<f64>,
    pub empty: bool,
    pub settlements: usize,
}

/// What a run would do, computed without a routing engine
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub region: String,
    /// `(columns, rows)` of the tile grid
    pub dimensions: (usize, usize),
    pub tiles: Vec<TilePlan>,
    pub settlements_total: usize,
    pub settlements_in_region: usize,
}

impl RunPlan {
    /// Tiles that would issue routing calls
    pub fn active_tiles(&self) -> usize {
        self.tiles.iter().filter(|t| !t.empty && t.settlements > 0).count()
    }
}

/// Tile the region and count settlements per tile
pub fn plan(input: &AccessibilityInput, config: &EngineConfig) -> Result<RunPlan> {
    config.validate()?;
    input.validate()?;

    let grid = partition(&input.region, config.tile_size_km)?;
    let per_tile = assign_settlements(&grid, &input.region, &input.settlements);

    let tiles: Vec<TilePlan> = grid
        .tiles()
        .iter()
        .zip(&per_tile)
        .map(|(tile, settlements)| TilePlan {
            index: tile.index(),
            bounds: tile.tile.bounds,
            empty: tile.is_empty(),
            settlements: settlements.len(),
        })
        .collect();

    Ok(RunPlan {
        region: input.region.name.clone(),
        dimensions: grid.dimensions(),
        settlements_in_region: tiles.iter().map(|t| t.settlements).sum(),
        settlements_total: input.settlements.len(),
        tiles,
    })
}

/// Computes accessibility tables against one routing engine
pub struct AccessibilityEngine<E> {
    engine: Arc<E>,
    config: EngineConfig,
}

impl<E: RoutingEngine> AccessibilityEngine<E> {
    pub fn new(engine: Arc<E>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { engine, config })
    }

    /// Run the full computation and return the merged table
    pub async fn compute(
        &self,
        input: &AccessibilityInput,
        sink: &dyn ProgressSink,
    ) -> Result<(ResultTable, AccessibilityReport)> {
        let started = Instant::now();
        input.validate()?;

        let region = &input.region;
        log::info!(
            "Computing accessibility for '{}': {} settlements, {} facility categories",
            region.name,
            input.settlements.len(),
            input.categories.len()
        );

        let grid = partition(region, self.config.tile_size_km)?;
        let per_tile = assign_settlements(&grid, region, &input.settlements);
        let tile_count = grid.len();
        let empty_tiles = grid.tiles().iter().filter(|t| t.is_empty()).count();
        let settlements = per_tile.iter().map(Vec::len).sum();
        let (columns, rows) = grid.dimensions();
        log::info!(
            "{tile_count} tiles ({columns}x{rows}, {empty_tiles} outside region), {settlements} settlements inside"
        );

        // Never more engine permits than tiles that can run at once
        let mut config = self.config.clone();
        config.engine_pool_size = config.engine_pool_size.min(config.concurrency);
        let client = DistanceMatrixClient::from_config(Arc::clone(&self.engine), &config);
        log::debug!(
            "Tile concurrency {}, routing engine pool {}",
            config.concurrency,
            client.pool_size()
        );

        let names: Vec<String> = input.categories.iter().map(|c| c.name.clone()).collect();
        let worker = TileWorker::new(
            client,
            input.categories.clone().into(),
            SearchParams::from(&config),
        );
        let mut scheduler = Scheduler::new(worker, config.concurrency);

        let jobs = grid.into_tiles().into_iter().zip(per_tile).collect();
        let results = scheduler.run(jobs, sink).await?;
        let table = aggregate(results, &names);

        let report = AccessibilityReport {
            region: region.name.clone(),
            tiles: tile_count,
            empty_tiles,
            settlements,
            rows: table.len(),
            elapsed: started.elapsed(),
        };
        log::info!(
            "Computed {} rows for '{}' in {}",
            report.rows,
            report.region,
            report.elapsed_display()
        );
        Ok((table, report))
    }
}
