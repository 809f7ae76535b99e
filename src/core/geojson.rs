//! GeoJSON input loading
//!
//! Only what the engine consumes is understood: `Polygon`/`MultiPolygon`
//! features for the region and `Point` features for settlements and
//! facilities. Documents may be a `FeatureCollection` or a single `Feature`.

use geo::{Coord, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::core::error::{Error, Result};
use crate::core::model::{FacilityCategory, Properties, Region, SettlementPoint};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Document {
    FeatureCollection { features: Vec<Feature> },
    Feature(Feature),
}

impl Document {
    fn into_features(self) -> Vec<Feature> {
        match self {
            Document::FeatureCollection { features } => features,
            Document::Feature(feature) => vec![feature],
        }
    }
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<Properties>,
}

impl Feature {
    fn property(&self, key: &str) -> Option<&Value> {
        self.properties.as_ref().and_then(|p| p.get(key))
    }
}

type Position = Vec<f64>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Point { coordinates: Position },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    #[serde(other)]
    Unsupported,
}

fn parse(text: &str) -> Result<Vec<Feature>> {
    let document: Document = serde_json::from_str(text)
        .map_err(|e| Error::InvalidInput(format!("Invalid GeoJSON: {e}")))?;
    Ok(document.into_features())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
    })
}

fn coord(position: &[f64]) -> Result<Coord<f64>> {
    match position {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        _ => Err(Error::InvalidInput(format!("Invalid position {position:?}"))),
    }
}

fn ring(positions: &[Position]) -> Result<LineString<f64>> {
    positions
        .iter()
        .map(|p| coord(p))
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| Error::Geometry("Polygon without exterior ring".to_string()))?;
    Ok(Polygon::new(
        ring(exterior)?,
        interiors.iter().map(|r| ring(r)).collect::<Result<_>>()?,
    ))
}

fn point(feature: &Feature, what: &str, position: usize) -> Result<Point<f64>> {
    match &feature.geometry {
        Some(Geometry::Point { coordinates }) => Ok(Point::from(coord(coordinates)?)),
        _ => Err(Error::InvalidInput(format!(
            "{what} feature {position} is not a Point"
        ))),
    }
}

fn name_of(feature: &Feature) -> Option<&str> {
    feature.property("name").and_then(Value::as_str)
}

/// Region from a GeoJSON document.
///
/// With `name`, the first feature whose `name` property matches is used;
/// without, the first polygonal feature.
pub fn parse_region(text: &str, name: Option<&str>) -> Result<Region> {
    let features = parse(text)?;
    let is_polygonal = |f: &&Feature| {
        matches!(
            f.geometry,
            Some(Geometry::Polygon { .. }) | Some(Geometry::MultiPolygon { .. })
        )
    };

    let feature = match name {
        Some(wanted) => features
            .iter()
            .find(|f| name_of(f) == Some(wanted))
            .ok_or_else(|| Error::InvalidInput(format!("No region named '{wanted}'")))?,
        None => features
            .iter()
            .find(is_polygonal)
            .ok_or_else(|| Error::Geometry("No polygon feature found".to_string()))?,
    };

    let region_name = name_of(feature).or(name).unwrap_or("region").to_string();
    let geometry = match &feature.geometry {
        Some(Geometry::Polygon { coordinates }) => MultiPolygon::new(vec![polygon(coordinates)?]),
        Some(Geometry::MultiPolygon { coordinates }) => MultiPolygon::new(
            coordinates
                .iter()
                .map(|rings| polygon(rings))
                .collect::<Result<_>>()?,
        ),
        _ => {
            return Err(Error::Geometry(format!(
                "Region '{region_name}' is not a Polygon or MultiPolygon"
            )))
        }
    };

    Ok(Region::new(region_name, geometry))
}

/// Settlements from `Point` features; the feature position is the id
pub fn parse_settlements(text: &str) -> Result<Vec<SettlementPoint>> {
    parse(text)?
        .into_iter()
        .enumerate()
        .map(|(id, feature)| {
            let location = point(&feature, "Settlement", id)?;
            Ok(SettlementPoint::new(
                id,
                location,
                feature.properties.unwrap_or_default(),
            ))
        })
        .collect()
}

/// One facility category from a document of `Point` features
pub fn parse_facilities(name: &str, text: &str) -> Result<FacilityCategory> {
    let points = parse(text)?
        .iter()
        .enumerate()
        .map(|(i, feature)| point(feature, name, i))
        .collect::<Result<Vec<_>>>()?;
    Ok(FacilityCategory::new(name, points))
}

/// Split one document of `Point` features into categories by the value of
/// `field`, in first-seen order. Features without the field are skipped.
pub fn parse_facilities_by_field(text: &str, field: &str) -> Result<Vec<FacilityCategory>> {
    let mut categories: Vec<FacilityCategory> = Vec::new();
    let mut skipped = 0usize;

    for (i, feature) in parse(text)?.iter().enumerate() {
        let key = match feature.property(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                skipped += 1;
                continue;
            }
            Some(other) => other.to_string(),
        };
        let location = point(feature, &key, i)?;
        match categories.iter_mut().find(|c| c.name == key) {
            Some(category) => category.points.push(location),
            None => categories.push(FacilityCategory::new(key, vec![location])),
        }
    }

    if skipped > 0 {
        log::warn!("{skipped} facilities without a '{field}' property were ignored");
    }
    Ok(categories)
}

pub fn load_region(path: &Path, name: Option<&str>) -> Result<Region> {
    parse_region(&read(path)?, name)
}

pub fn load_settlements(path: &Path) -> Result<Vec<SettlementPoint>> {
    parse_settlements(&read(path)?)
}

pub fn load_facilities(name: &str, path: &Path) -> Result<FacilityCategory> {
    parse_facilities(name, &read(path)?)
}

pub fn load_facilities_by_field(path: &Path, field: &str) -> Result<Vec<FacilityCategory>> {
    parse_facilities_by_field(&read(path)?, field)
}
