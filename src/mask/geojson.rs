//! GeoJSON polygon loading.
//!
//! Accepts Polygon and MultiPolygon geometries, bare or wrapped in a
//! Feature / FeatureCollection. Coordinates are WGS84 per RFC 7946, so the
//! resulting mask carries EPSG:4326.

use super::{Mask, MaskError, Polygon};
use serde_json::Value;
use std::path::Path;

const GEOJSON_EPSG: u16 = 4326;

pub fn load_geojson_file(path: &Path) -> Result<Mask, MaskError> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    mask_from_geojson(&value)
}

pub fn mask_from_geojson(value: &Value) -> Result<Mask, MaskError> {
    let polygons = polygons_from_geojson(value)?;
    if polygons.is_empty() {
        return Err(MaskError::InvalidGeometry(
            "no polygon geometry found".to_string(),
        ));
    }
    Ok(Mask::Vector {
        polygons,
        epsg: GEOJSON_EPSG,
    })
}

pub fn polygons_from_geojson(value: &Value) -> Result<Vec<Polygon>, MaskError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| MaskError::InvalidGeometry("missing type member".to_string()))?;

    match kind {
        "Polygon" => Ok(vec![parse_polygon(coordinates(value)?)?]),
        "MultiPolygon" => coordinates(value)?
            .as_array()
            .ok_or_else(|| bad("MultiPolygon coordinates are not an array"))?
            .iter()
            .map(parse_polygon)
            .collect(),
        "Feature" => {
            let geometry = value
                .get("geometry")
                .ok_or_else(|| bad("feature without geometry"))?;
            polygons_from_geojson(geometry)
        }
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| bad("feature collection without features"))?;
            let mut polygons = vec![];
            for feature in features {
                polygons.extend(polygons_from_geojson(feature)?);
            }
            Ok(polygons)
        }
        other => Err(bad(&format!("unsupported geometry type {other}"))),
    }
}

fn coordinates(value: &Value) -> Result<&Value, MaskError> {
    value
        .get("coordinates")
        .ok_or_else(|| bad("geometry without coordinates"))
}

fn parse_polygon(rings: &Value) -> Result<Polygon, MaskError> {
    let rings = rings
        .as_array()
        .ok_or_else(|| bad("polygon coordinates are not an array"))?;
    let mut parsed = rings.iter().map(|ring| parse_ring(ring));
    let exterior = parsed
        .next()
        .ok_or_else(|| bad("polygon without rings"))??;
    let holes = parsed.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon { exterior, holes })
}

fn parse_ring(ring: &Value) -> Result<Vec<(f64, f64)>, MaskError> {
    let positions = ring
        .as_array()
        .ok_or_else(|| bad("ring is not an array"))?;
    if positions.len() < 4 {
        return Err(bad("ring has fewer than 4 positions"));
    }
    positions
        .iter()
        .map(|position| {
            let coords = position
                .as_array()
                .ok_or_else(|| bad("position is not an array"))?;
            match (
                coords.first().and_then(Value::as_f64),
                coords.get(1).and_then(Value::as_f64),
            ) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Err(bad("position is not numeric")),
            }
        })
        .collect()
}

fn bad(message: &str) -> MaskError {
    MaskError::InvalidGeometry(message.to_string())
}
