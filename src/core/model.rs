//! Input and output data model
//!
//! Geometries use `geo` types with `x = longitude`, `y = latitude`.
//! Property bags are ordered JSON maps so the original column order of the
//! settlements survives into the output table.

use geo::{Area, CoordsIter, MultiPolygon, Point};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::core::error::{Error, Result};

/// Arbitrary settlement attributes (name, population, ...)
pub type Properties = Map<String, Value>;

/// Output field holding the settlement latitude
pub const LAT_FIELD: &str = "lat";

/// Output field holding the settlement longitude
pub const LON_FIELD: &str = "lon";

/// Output field holding the distance to the nearest road
pub const NEAREST_FIELD: &str = "nearest";

/// Administrative area to analyse
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

impl Region {
    pub fn new(name: impl Into<String>, geometry: impl Into<MultiPolygon<f64>>) -> Self {
        Self {
            name: name.into(),
            geometry: geometry.into(),
        }
    }

    /// Reject empty, non-finite or zero-area geometries
    pub fn validate(&self) -> Result<()> {
        if self.geometry.0.is_empty() {
            return Err(Error::Geometry(format!("Region '{}' has no polygons", self.name)));
        }
        if self.geometry.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(Error::Geometry(format!(
                "Region '{}' contains non-finite coordinates",
                self.name
            )));
        }
        let area = self.geometry.unsigned_area();
        if !(area > 0.0) {
            return Err(Error::Geometry(format!("Region '{}' has zero area", self.name)));
        }
        Ok(())
    }
}

/// A populated place whose accessibility is measured
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPoint {
    /// Identity of the settlement within one run (input position)
    pub id: usize,
    pub location: Point<f64>,
    pub properties: Properties,
}

impl SettlementPoint {
    pub fn new(id: usize, location: Point<f64>, properties: Properties) -> Self {
        Self {
            id,
            location,
            properties,
        }
    }

    pub fn lon(&self) -> f64 {
        self.location.x()
    }

    pub fn lat(&self) -> f64 {
        self.location.y()
    }
}

/// A named set of facility locations, e.g. "hospitals"
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityCategory {
    pub name: String,
    pub points: Vec<Point<f64>>,
}

impl FacilityCategory {
    pub fn new(name: impl Into<String>, points: Vec<Point<f64>>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One output row: a settlement's properties plus the computed fields
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub settlement_id: usize,
    pub properties: Properties,
}

impl ResultRow {
    /// ETA (or distance) stored under `field`; `None` for the unknown sentinel
    pub fn value(&self, field: &str) -> Option<f64> {
        self.properties.get(field).and_then(Value::as_f64)
    }
}

/// Everything one computation needs, already parsed
#[derive(Debug, Clone)]
pub struct AccessibilityInput {
    pub region: Region,
    pub settlements: Vec<SettlementPoint>,
    pub categories: Vec<FacilityCategory>,
}

impl AccessibilityInput {
    pub fn new(
        region: Region,
        settlements: Vec<SettlementPoint>,
        categories: Vec<FacilityCategory>,
    ) -> Self {
        Self {
            region,
            settlements,
            categories,
        }
    }

    /// Check geometry first, then points and category names
    pub fn validate(&self) -> Result<()> {
        self.region.validate()?;

        let mut ids = HashSet::with_capacity(self.settlements.len());
        for settlement in &self.settlements {
            if !finite(&settlement.location) {
                return Err(Error::InvalidInput(format!(
                    "Settlement {} has non-finite coordinates",
                    settlement.id
                )));
            }
            if !ids.insert(settlement.id) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate settlement id {}",
                    settlement.id
                )));
            }
        }

        let mut names = HashSet::with_capacity(self.categories.len());
        for category in &self.categories {
            if category.name.is_empty() {
                return Err(Error::InvalidInput("Facility category with empty name".to_string()));
            }
            if [LAT_FIELD, LON_FIELD, NEAREST_FIELD].contains(&category.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Facility category name '{}' is reserved",
                    category.name
                )));
            }
            if !names.insert(category.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate facility category '{}'",
                    category.name
                )));
            }
            if let Some(bad) = category.points.iter().position(|p| !finite(p)) {
                return Err(Error::InvalidInput(format!(
                    "Facility {bad} of category '{}' has non-finite coordinates",
                    category.name
                )));
            }
        }
        Ok(())
    }
}

fn finite(point: &Point<f64>) -> bool {
    point.x().is_finite() && point.y().is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, LineString, Polygon};

    fn square() -> Region {
        Region::new(
            "square",
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)],
        )
    }

    #[test]
    fn test_region_validation() {
        assert!(square().validate().is_ok());

        let empty = Region::new("empty", MultiPolygon::<f64>::new(vec![]));
        assert!(matches!(empty.validate(), Err(Error::Geometry(_))));

        let flat = Region::new(
            "flat",
            Polygon::new(
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]),
                vec![],
            ),
        );
        assert!(matches!(flat.validate(), Err(Error::Geometry(_))));

        let nan = Region::new(
            "nan",
            polygon![(x: 0.0, y: 0.0), (x: f64::NAN, y: 0.0), (x: 1.0, y: 1.0)],
        );
        assert!(matches!(nan.validate(), Err(Error::Geometry(_))));
    }

    #[test]
    fn test_reserved_and_duplicate_category_names() {
        let reserved = AccessibilityInput::new(
            square(),
            vec![],
            vec![FacilityCategory::new("nearest", vec![])],
        );
        assert!(matches!(reserved.validate(), Err(Error::InvalidInput(_))));

        let duplicate = AccessibilityInput::new(
            square(),
            vec![],
            vec![
                FacilityCategory::new("banks", vec![]),
                FacilityCategory::new("banks", vec![]),
            ],
        );
        assert!(matches!(duplicate.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_settlement_checks() {
        let input = AccessibilityInput::new(
            square(),
            vec![
                SettlementPoint::new(0, Point::new(0.5, 0.5), Properties::new()),
                SettlementPoint::new(0, Point::new(0.2, 0.2), Properties::new()),
            ],
            vec![],
        );
        assert!(matches!(input.validate(), Err(Error::InvalidInput(_))));

        let input = AccessibilityInput::new(
            square(),
            vec![SettlementPoint::new(0, Point::new(f64::INFINITY, 0.5), Properties::new())],
            vec![],
        );
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_row_value_reads_numbers_only() {
        let mut properties = Properties::new();
        properties.insert("hospitals".to_string(), Value::from(120.5));
        properties.insert("banks".to_string(), Value::Null);
        let row = ResultRow {
            settlement_id: 0,
            properties,
        };
        assert_eq!(row.value("hospitals"), Some(120.5));
        assert_eq!(row.value("banks"), None);
        assert_eq!(row.value("schools"), None);
    }
}
