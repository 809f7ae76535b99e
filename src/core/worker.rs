//! Per-tile accessibility computation

use geo::Point;
use serde_json::Value;
use std::sync::Arc;

use crate::core::error::Result;
use crate::core::grid::ClippedTile;
use crate::core::model::{FacilityCategory, ResultRow, SettlementPoint, LAT_FIELD, LON_FIELD, NEAREST_FIELD};
use crate::core::routing::{DistanceMatrixClient, RoutingEngine};
use crate::core::search::{find_facilities, SearchParams};

/// Computes the result rows of one tile.
///
/// Calls inside a tile are sequential: categories one after another, then
/// the nearest-road lookup for each settlement. The first routing failure
/// aborts the tile.
pub struct TileWorker<E> {
    client: DistanceMatrixClient<E>,
    categories: Arc<[FacilityCategory]>,
    params: SearchParams,
}

impl<E> Clone for TileWorker<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            categories: Arc::clone(&self.categories),
            params: self.params,
        }
    }
}

impl<E: RoutingEngine> TileWorker<E> {
    pub fn new(
        client: DistanceMatrixClient<E>,
        categories: Arc<[FacilityCategory]>,
        params: SearchParams,
    ) -> Self {
        Self {
            client,
            categories,
            params,
        }
    }

    /// One row per settlement of `tile`, in settlement order
    pub async fn run(&self, tile: &ClippedTile, settlements: Vec<SettlementPoint>) -> Result<Vec<ResultRow>> {
        let Some(area) = &tile.area else {
            log::debug!("Tile {}: no intersection with region, skipped", tile.index());
            return Ok(Vec::new());
        };
        if settlements.is_empty() {
            log::debug!("Tile {}: no settlements, skipped", tile.index());
            return Ok(Vec::new());
        }

        let sources: Vec<Point<f64>> = settlements.iter().map(|s| s.location).collect();
        let mut etas: Vec<Vec<Option<f64>>> = Vec::with_capacity(self.categories.len());

        for category in self.categories.iter() {
            let outcome = find_facilities(area, &category.points, &self.params);
            if outcome.facilities.is_empty() {
                log::warn!(
                    "Tile {}: category '{}' has no facilities, ETA unknown for {} settlements",
                    tile.index(),
                    category.name,
                    settlements.len()
                );
                etas.push(vec![None; settlements.len()]);
                continue;
            }
            log::debug!(
                "Tile {}: {} '{}' candidates within {}s ({} buffer steps)",
                tile.index(),
                outcome.facilities.len(),
                category.name,
                outcome.time_secs,
                outcome.steps
            );
            let matrix = self
                .client
                .travel_time_matrix(&sources, &outcome.facilities)
                .await?;
            etas.push(matrix.row_minima());
        }

        let mut nearest = Vec::with_capacity(settlements.len());
        for settlement in &settlements {
            nearest.push(self.client.nearest_road(settlement.location).await?);
        }

        let rows = settlements
            .into_iter()
            .enumerate()
            .map(|(i, settlement)| {
                let (lat, lon) = (settlement.lat(), settlement.lon());
                let mut properties = settlement.properties;
                properties.insert(LAT_FIELD.to_string(), Value::from(lat));
                properties.insert(LON_FIELD.to_string(), Value::from(lon));
                for (category, times) in self.categories.iter().zip(&etas) {
                    properties.insert(category.name.clone(), eta_value(times[i]));
                }
                properties.insert(NEAREST_FIELD.to_string(), Value::from(nearest[i]));
                ResultRow {
                    settlement_id: settlement.id,
                    properties,
                }
            })
            .collect();

        Ok(rows)
    }
}

fn eta_value(eta: Option<f64>) -> Value {
    eta.map_or(Value::Null, Value::from)
}
