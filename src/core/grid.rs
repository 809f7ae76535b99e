//! Square tiling of a region
//!
//! The region's bounding box is covered by square cells of a fixed side
//! length (in kilometers), laid out column by column starting at the
//! south-west corner. Each cell is clipped against the region polygon.
//! Cells that miss the region are kept (marked empty) so the tile count
//! reported to progress sinks always matches the grid.
//!
//! Settlements are assigned to cells with half-open bounds
//! (`[min, max)` on both axes), which gives every point exactly one cell even
//! when it sits on a shared edge.

use geo::{Area, BooleanOps, BoundingRect, Coord, HaversineDistance, Intersects, MultiPolygon, Point, Rect};

use crate::core::error::{Error, Result};
use crate::core::model::{Region, SettlementPoint};

/// One grid cell, before clipping
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub index: usize,
    pub bounds: Rect<f64>,
}

/// A grid cell intersected with the region
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedTile {
    pub tile: Tile,
    /// `None` when the cell does not overlap the region
    pub area: Option<MultiPolygon<f64>>,
}

impl ClippedTile {
    pub fn index(&self) -> usize {
        self.tile.index
    }

    pub fn is_empty(&self) -> bool {
        self.area.is_none()
    }
}

/// The tiling of one region
#[derive(Debug, Clone)]
pub struct TileGrid {
    origin: Coord<f64>,
    cell_width: f64,
    cell_height: f64,
    columns: usize,
    rows: usize,
    tiles: Vec<ClippedTile>,
}

impl TileGrid {
    pub fn tiles(&self) -> &[ClippedTile] {
        &self.tiles
    }

    pub fn into_tiles(self) -> Vec<ClippedTile> {
        self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// `(columns, rows)` of the grid
    pub fn dimensions(&self) -> (usize, usize) {
        (self.columns, self.rows)
    }

    /// Cell size in degrees `(width, height)`
    pub fn cell_size(&self) -> (f64, f64) {
        (self.cell_width, self.cell_height)
    }

    /// Index of the cell owning `coord`, using half-open cell bounds
    pub fn cell_of(&self, coord: Coord<f64>) -> Option<usize> {
        let column = axis_cell(coord.x - self.origin.x, self.cell_width, self.columns)?;
        let row = axis_cell(coord.y - self.origin.y, self.cell_height, self.rows)?;
        Some(column * self.rows + row)
    }

    /// Tile that receives a point whose half-open cell is `cell`
    ///
    /// A point on the region boundary can sit on the west or south edge of a
    /// cell with no overlap; it then goes to the neighbouring cell sharing
    /// that edge.
    fn owning_tile(&self, cell: usize, coord: Coord<f64>) -> Option<usize> {
        if !self.tiles[cell].is_empty() {
            return Some(cell);
        }
        let (column, row) = (cell / self.rows, cell % self.rows);
        let neighbours = [
            (column.checked_sub(1), Some(row)),
            (Some(column), row.checked_sub(1)),
            (column.checked_sub(1), row.checked_sub(1)),
        ];
        neighbours
            .into_iter()
            .filter_map(|(c, r)| Some(c? * self.rows + r?))
            .find(|&i| !self.tiles[i].is_empty() && self.touches(&self.tiles[i].tile.bounds, coord))
    }

    /// Closed bounds test with a tolerance for edges computed in floating point
    fn touches(&self, bounds: &Rect<f64>, coord: Coord<f64>) -> bool {
        let dx = self.cell_width * 1e-9;
        let dy = self.cell_height * 1e-9;
        coord.x >= bounds.min().x - dx
            && coord.x <= bounds.max().x + dx
            && coord.y >= bounds.min().y - dy
            && coord.y <= bounds.max().y + dy
    }
}

fn axis_cell(offset: f64, cell: f64, count: usize) -> Option<usize> {
    if !(offset >= 0.0) || offset > cell * count as f64 {
        return None;
    }
    // The far edge of the last cell is closed so the bounding box max is covered
    Some(((offset / cell).floor() as usize).min(count - 1))
}

/// Split `region` into square tiles of `side_km` and clip them to it
pub fn partition(region: &Region, side_km: f64) -> Result<TileGrid> {
    if !side_km.is_finite() || side_km <= 0.0 {
        return Err(Error::Config(format!(
            "Tile size must be a positive number of kilometers, got {side_km}"
        )));
    }
    let bbox = region
        .geometry
        .bounding_rect()
        .ok_or_else(|| Error::Geometry(format!("Region '{}' has no extent", region.name)))?;

    let (west, south) = (bbox.min().x, bbox.min().y);
    let (east, north) = (bbox.max().x, bbox.max().y);

    // Kilometers along the southern and western edges of the box
    let sw = Point::new(west, south);
    let width_km = sw.haversine_distance(&Point::new(east, south)) / 1000.0;
    let height_km = sw.haversine_distance(&Point::new(west, north)) / 1000.0;
    if !(width_km > 0.0) || !(height_km > 0.0) {
        return Err(Error::Geometry(format!(
            "Region '{}' has a degenerate bounding box",
            region.name
        )));
    }

    let cell_width = side_km / width_km * (east - west);
    let cell_height = side_km / height_km * (north - south);
    let columns = ((width_km / side_km).ceil() as usize).max(1);
    let rows = ((height_km / side_km).ceil() as usize).max(1);

    let mut tiles = Vec::with_capacity(columns * rows);
    for column in 0..columns {
        let x0 = west + column as f64 * cell_width;
        for row in 0..rows {
            let y0 = south + row as f64 * cell_height;
            let bounds = Rect::new(
                Coord { x: x0, y: y0 },
                Coord {
                    x: x0 + cell_width,
                    y: y0 + cell_height,
                },
            );
            let tile = Tile {
                index: column * rows + row,
                bounds,
            };
            let area = clip(&region.geometry, &tile.bounds);
            tiles.push(ClippedTile { tile, area });
        }
    }

    Ok(TileGrid {
        origin: Coord { x: west, y: south },
        cell_width,
        cell_height,
        columns,
        rows,
        tiles,
    })
}

fn clip(region: &MultiPolygon<f64>, bounds: &Rect<f64>) -> Option<MultiPolygon<f64>> {
    let square = MultiPolygon::new(vec![bounds.to_polygon()]);
    let clipped = region.intersection(&square);
    if clipped.0.is_empty() || !(clipped.unsigned_area() > 0.0) {
        None
    } else {
        Some(clipped)
    }
}

/// Distribute settlements over the tiles of `grid`
///
/// Each settlement inside the region lands in exactly one tile. Settlements
/// outside the region, or whose cell has no usable overlap with it, are
/// dropped with a log line.
pub fn assign_settlements(
    grid: &TileGrid,
    region: &Region,
    settlements: &[SettlementPoint],
) -> Vec<Vec<SettlementPoint>> {
    let mut per_tile: Vec<Vec<SettlementPoint>> = vec![Vec::new(); grid.len()];
    let mut outside = 0usize;

    for settlement in settlements {
        if !region.geometry.intersects(&settlement.location) {
            outside += 1;
            continue;
        }
        let Some(cell) = grid.cell_of(settlement.location.0) else {
            outside += 1;
            continue;
        };
        let Some(owner) = grid.owning_tile(cell, settlement.location.0) else {
            log::warn!(
                "Settlement {} touches the region only at tile {} boundary; skipped",
                settlement.id,
                cell
            );
            continue;
        };
        per_tile[owner].push(settlement.clone());
    }

    if outside > 0 {
        log::debug!("{outside} settlements lie outside region '{}'", region.name);
    }
    per_tile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Properties;
    use geo::polygon;

    fn half_degree_square() -> Region {
        Region::new(
            "half",
            polygon![(x: 0.0, y: 0.0), (x: 0.5, y: 0.0), (x: 0.5, y: 0.5), (x: 0.0, y: 0.5)],
        )
    }

    fn settlement(id: usize, x: f64, y: f64) -> SettlementPoint {
        SettlementPoint::new(id, Point::new(x, y), Properties::new())
    }

    #[test]
    fn test_half_degree_square_gives_two_by_two() {
        // 0.5 degree at the equator is ~55.6 km, so 30 km cells need 2x2
        let grid = partition(&half_degree_square(), 30.0).unwrap();
        assert_eq!(grid.dimensions(), (2, 2));
        assert_eq!(grid.len(), 4);
        assert!(grid.tiles().iter().all(|t| !t.is_empty()));
        let indices: Vec<usize> = grid.tiles().iter().map(|t| t.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let region = Region::new(
            "one",
            polygon![(x: 10.0, y: 45.0), (x: 11.0, y: 45.0), (x: 11.0, y: 46.0), (x: 10.0, y: 46.0)],
        );
        let a = partition(&region, 25.0).unwrap();
        let b = partition(&region, 25.0).unwrap();
        assert_eq!(a.tiles(), b.tiles());
    }

    #[test]
    fn test_grid_covers_bounding_box() {
        let region = Region::new(
            "one",
            polygon![(x: 10.0, y: 45.0), (x: 11.0, y: 45.0), (x: 11.0, y: 46.0), (x: 10.0, y: 46.0)],
        );
        let grid = partition(&region, 30.0).unwrap();
        let (columns, rows) = grid.dimensions();
        let (width, height) = grid.cell_size();
        assert!(10.0 + columns as f64 * width >= 11.0);
        assert!(45.0 + rows as f64 * height >= 46.0);
        assert!(grid.cell_of(Coord { x: 11.0, y: 46.0 }).is_some());
        assert!(grid.cell_of(Coord { x: 9.99, y: 45.5 }).is_none());
    }

    #[test]
    fn test_cells_outside_region_are_kept_but_empty() {
        // L-shape: the north-east quadrant is missing
        let region = Region::new(
            "ell",
            polygon![
                (x: 0.0, y: 0.0),
                (x: 0.5, y: 0.0),
                (x: 0.5, y: 0.2),
                (x: 0.2, y: 0.2),
                (x: 0.2, y: 0.5),
                (x: 0.0, y: 0.5)
            ],
        );
        let grid = partition(&region, 30.0).unwrap();
        assert_eq!(grid.len(), 4);
        let empty: Vec<usize> = grid
            .tiles()
            .iter()
            .filter(|t| t.is_empty())
            .map(|t| t.index())
            .collect();
        assert_eq!(empty, vec![3]);
    }

    #[test]
    fn test_shared_edge_settlement_assigned_once() {
        let region = half_degree_square();
        let grid = partition(&region, 30.0).unwrap();
        let (width, height) = grid.cell_size();
        let settlements = vec![
            settlement(0, width, 0.1),     // on the vertical shared edge
            settlement(1, 0.1, height),    // on the horizontal shared edge
            settlement(2, width, height),  // on the shared corner
            settlement(3, 0.0, 0.0),       // region corner
            settlement(4, 0.5, 0.5),       // far region corner
        ];
        let assigned = assign_settlements(&grid, &region, &settlements);
        let mut ids: Vec<usize> = assigned.iter().flatten().map(|s| s.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        // Shared edges belong to the cell on the east/north side
        assert_eq!(assigned[2].iter().map(|s| s.id).collect::<Vec<_>>(), vec![0]);
        assert!(assigned[1].iter().any(|s| s.id == 1));
        assert!(assigned[3].iter().any(|s| s.id == 2));
    }

    #[test]
    fn test_boundary_settlement_next_to_empty_cell_kept() {
        let square = half_degree_square();
        let (width, height) = partition(&square, 30.0).unwrap().cell_size();
        // L-shape whose inner vertical edge lies exactly on the first column edge
        let region = Region::new(
            "ell",
            polygon![
                (x: 0.0, y: 0.0),
                (x: 0.5, y: 0.0),
                (x: 0.5, y: height),
                (x: width, y: height),
                (x: width, y: 0.5),
                (x: 0.0, y: 0.5)
            ],
        );
        let grid = partition(&region, 30.0).unwrap();
        assert_eq!(grid.cell_size(), (width, height));
        assert!(grid.tiles()[3].is_empty());

        let settlements = vec![settlement(0, width, 0.4)];
        assert!(region.geometry.intersects(&settlements[0].location));
        let assigned = assign_settlements(&grid, &region, &settlements);
        assert_eq!(assigned.iter().map(Vec::len).sum::<usize>(), 1);
        assert_eq!(assigned[1].len(), 1);
    }

    #[test]
    fn test_settlements_outside_region_dropped() {
        let region = half_degree_square();
        let grid = partition(&region, 30.0).unwrap();
        let settlements = vec![settlement(0, 0.1, 0.1), settlement(1, 3.0, 3.0)];
        let assigned = assign_settlements(&grid, &region, &settlements);
        assert_eq!(assigned.iter().map(Vec::len).sum::<usize>(), 1);
    }

    #[test]
    fn test_non_positive_tile_size_rejected() {
        assert!(matches!(
            partition(&half_degree_square(), 0.0),
            Err(Error::Config(_))
        ));
    }
}
