//! Mask rasterization and application.
//!
//! A [`Mask`] is either a polygon set in some CRS or a raster. Either way it
//! is rasterized onto the output grid exactly once (see [`MaskCache`]) into
//! a 0/1 window, then applied to the mosaic. Application can only remove or
//! scale data; a pixel that was nodata going in is nodata coming out.

mod cache;
mod geojson;

pub use cache::MaskCache;
pub use geojson::{load_geojson_file, mask_from_geojson, polygons_from_geojson};

use crate::geo::{Crs, GeoError, GridSpec};
use crate::raster::RasterWindow;
use crate::reproject::{reproject, ReprojectError, Resampling};
use serde::Deserialize;
use std::io;

#[derive(Debug)]
pub enum MaskError {
    CrsMismatch { mask: u16, grid: u16 },
    InvalidGeometry(String),
    GeoError(GeoError),
    ReprojectError(ReprojectError),
    JsonError(serde_json::Error),
    IoError(io::Error),
}

impl std::fmt::Display for MaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for MaskError {}

impl From<GeoError> for MaskError {
    fn from(e: GeoError) -> Self {
        MaskError::GeoError(e)
    }
}

impl From<serde_json::Error> for MaskError {
    fn from(e: serde_json::Error) -> Self {
        MaskError::JsonError(e)
    }
}

impl From<io::Error> for MaskError {
    fn from(e: io::Error) -> Self {
        MaskError::IoError(e)
    }
}

/// A polygon with optional holes, vertices in the owning mask's CRS.
#[derive(Clone, Debug)]
pub struct Polygon {
    pub exterior: Vec<(f64, f64)>,
    pub holes: Vec<Vec<(f64, f64)>>,
}

#[derive(Clone, Debug)]
pub enum Mask {
    Vector { polygons: Vec<Polygon>, epsg: u16 },
    Raster(RasterWindow),
}

/// Edge-pixel classification rule for vector rasterization. `Centroid`
/// includes a pixel only when its center is inside a polygon; `AllTouched`
/// also includes every pixel a polygon boundary passes through. The choice
/// changes edge pixels, so it is explicit on every call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionRule {
    AllTouched,
    Centroid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    SetNodataOutside,
    SetNodataInside,
    Multiply,
}

/// Rasterize a mask onto `grid`: 1.0 inside, 0.0 outside.
pub fn rasterize(
    mask: &Mask,
    grid: &GridSpec,
    rule: InclusionRule,
) -> Result<RasterWindow, MaskError> {
    match mask {
        Mask::Vector { polygons, epsg } => {
            let polygons = reproject_polygons(polygons, *epsg, grid.epsg())?;
            Ok(rasterize_polygons(&polygons, grid, rule))
        }
        Mask::Raster(raster) => {
            let aligned = if raster.is_on_grid(grid) {
                raster.clone()
            } else {
                reproject(raster, grid, Resampling::Nearest).map_err(|e| match e {
                    ReprojectError::UnsupportedCrs(_) => MaskError::CrsMismatch {
                        mask: raster.epsg,
                        grid: grid.epsg(),
                    },
                    other => MaskError::ReprojectError(other),
                })?
            };
            let mut out = RasterWindow::filled(grid, 1, -1.0);
            for (i, v) in out.buffer.iter_mut().enumerate() {
                let sample = aligned.buffer[i * aligned.bands as usize];
                *v = if !aligned.is_nodata(sample) && sample != 0.0 {
                    1.0
                } else {
                    0.0
                };
            }
            Ok(out)
        }
    }
}

/// Apply a rasterized mask. The mask must sit on the same grid as the
/// raster (same shape); anything else is an upstream programming error.
pub fn apply(mut raster: RasterWindow, mask: &RasterWindow, mode: MaskMode) -> RasterWindow {
    assert_eq!(
        (raster.width, raster.height),
        (mask.width, mask.height),
        "mask shape differs from raster"
    );
    let bands = raster.bands as usize;
    let nodata = raster.nodata;
    for i in 0..raster.buffer.len() {
        if raster.is_nodata(raster.buffer[i]) {
            continue;
        }
        let m = mask.buffer[i / bands];
        raster.buffer[i] = match mode {
            MaskMode::SetNodataOutside => {
                if m == 0.0 {
                    nodata
                } else {
                    raster.buffer[i]
                }
            }
            MaskMode::SetNodataInside => {
                if m != 0.0 {
                    nodata
                } else {
                    raster.buffer[i]
                }
            }
            MaskMode::Multiply => raster.buffer[i] * m,
        };
    }
    raster
}

fn reproject_polygons(
    polygons: &[Polygon],
    from_epsg: u16,
    to_epsg: u16,
) -> Result<Vec<Polygon>, MaskError> {
    if from_epsg == to_epsg {
        return Ok(polygons.to_vec());
    }
    let src = Crs::from_epsg(from_epsg).map_err(|_| MaskError::CrsMismatch {
        mask: from_epsg,
        grid: to_epsg,
    })?;
    let dst = Crs::from_epsg(to_epsg).map_err(|_| MaskError::CrsMismatch {
        mask: from_epsg,
        grid: to_epsg,
    })?;

    let transform_ring = |ring: &[(f64, f64)]| -> Result<Vec<(f64, f64)>, MaskError> {
        ring.iter()
            .map(|&(x, y)| {
                src.transform_to(&dst, x, y).map_err(|_| MaskError::CrsMismatch {
                    mask: from_epsg,
                    grid: to_epsg,
                })
            })
            .collect()
    };

    polygons
        .iter()
        .map(|polygon| {
            Ok(Polygon {
                exterior: transform_ring(&polygon.exterior)?,
                holes: polygon
                    .holes
                    .iter()
                    .map(|hole| transform_ring(hole))
                    .collect::<Result<_, _>>()?,
            })
        })
        .collect()
}

fn rasterize_polygons(polygons: &[Polygon], grid: &GridSpec, rule: InclusionRule) -> RasterWindow {
    let mut out = RasterWindow::filled(grid, 1, -1.0);
    for v in out.buffer.iter_mut() {
        *v = 0.0;
    }

    // Interior pass: pixel centers inside any polygon.
    for row in 0..grid.height() {
        for col in 0..grid.width() {
            let (x, y) = grid.pixel_center(col, row);
            if polygons.iter().any(|p| point_in_polygon(p, x, y)) {
                out.set(col, row, 0, 1.0);
            }
        }
    }

    // Boundary pass: walk every ring and mark the cells it crosses.
    if rule == InclusionRule::AllTouched {
        let step = 0.5 * grid.pixel_size().0.min(grid.pixel_size().1);
        for polygon in polygons {
            for ring in std::iter::once(&polygon.exterior).chain(polygon.holes.iter()) {
                mark_ring_cells(&mut out, grid, ring, step);
            }
        }
    }

    out
}

/// Mark every cell a ring passes through, sampling each segment at
/// half-pixel steps.
fn mark_ring_cells(out: &mut RasterWindow, grid: &GridSpec, ring: &[(f64, f64)], step: f64) {
    for pair in ring.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        let samples = (length / step).ceil().max(1.0) as usize;
        for s in 0..=samples {
            let t = s as f64 / samples as f64;
            let (px, py) = grid.world_to_pixel(x0 + (x1 - x0) * t, y0 + (y1 - y0) * t);
            let col = px.floor();
            let row = py.floor();
            if col >= 0.0 && row >= 0.0 {
                out.set(col as u32, row as u32, 0, 1.0);
            }
        }
    }
}

fn point_in_polygon(polygon: &Polygon, x: f64, y: f64) -> bool {
    point_in_ring(&polygon.exterior, x, y)
        && !polygon.holes.iter().any(|hole| point_in_ring(hole, x, y))
}

/// Even-odd crossing test. The ring may be open or closed; the closing
/// segment is implied.
fn point_in_ring(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BoundingBox;

    fn grid_4x4() -> GridSpec {
        let bbox = BoundingBox::new(0.0, 0.0, 4.0, 4.0, 3857).unwrap();
        GridSpec::from_bbox(&bbox, (1.0, 1.0)).unwrap()
    }

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon {
        Polygon {
            exterior: vec![
                (min_x, min_y),
                (max_x, min_y),
                (max_x, max_y),
                (min_x, max_y),
                (min_x, min_y),
            ],
            holes: vec![],
        }
    }

    fn square(min: f64, max: f64) -> Polygon {
        rect(min, min, max, max)
    }

    #[test]
    fn centroid_rule_uses_pixel_centers() {
        let g = grid_4x4();
        // Covers x in [0, 1.4]: column 0 centers (0.5) are in, column 1
        // centers (1.5) are out.
        let mask = Mask::Vector {
            polygons: vec![rect(0.0, 0.0, 1.4, 4.0)],
            epsg: 3857,
        };
        let raster = rasterize(&mask, &g, InclusionRule::Centroid).unwrap();
        for row in 0..4 {
            assert_eq!(raster.get(0, row, 0), Some(1.0));
            assert_eq!(raster.get(1, row, 0), Some(0.0));
        }
    }

    #[test]
    fn all_touched_includes_boundary_pixels() {
        let g = grid_4x4();
        let mask = Mask::Vector {
            polygons: vec![rect(0.0, 0.0, 1.4, 4.0)],
            epsg: 3857,
        };
        let raster = rasterize(&mask, &g, InclusionRule::AllTouched).unwrap();
        for row in 0..4 {
            assert_eq!(raster.get(0, row, 0), Some(1.0));
            // The boundary at x = 1.4 crosses column 1.
            assert_eq!(raster.get(1, row, 0), Some(1.0));
            assert_eq!(raster.get(2, row, 0), Some(0.0));
        }
    }

    #[test]
    fn holes_are_excluded() {
        let g = grid_4x4();
        let mut polygon = square(0.0, 4.0);
        polygon.holes = vec![vec![(1.0, 1.0), (3.0, 1.0), (3.0, 3.0), (1.0, 3.0), (1.0, 1.0)]];
        let mask = Mask::Vector {
            polygons: vec![polygon],
            epsg: 3857,
        };
        let raster = rasterize(&mask, &g, InclusionRule::Centroid).unwrap();
        assert_eq!(raster.get(0, 0, 0), Some(1.0));
        assert_eq!(raster.get(1, 1, 0), Some(0.0));
        assert_eq!(raster.get(2, 2, 0), Some(0.0));
        assert_eq!(raster.get(3, 3, 0), Some(1.0));
    }

    #[test]
    fn unresolvable_mask_crs_is_a_mismatch() {
        let g = grid_4x4();
        let mask = Mask::Vector {
            polygons: vec![square(0.0, 1.0)],
            epsg: 1,
        };
        match rasterize(&mask, &g, InclusionRule::Centroid) {
            Err(MaskError::CrsMismatch { mask: 1, grid: 3857 }) => {}
            other => panic!("expected CrsMismatch, got {other:?}"),
        }
    }

    #[test]
    fn vector_mask_reprojects_before_rasterizing() {
        // A polygon defined in WGS84 against a mercator grid.
        let lat_lon = BoundingBox::new(10.0, 50.0, 10.1, 50.1, 4326).unwrap();
        let merc = lat_lon.to_crs(3857).unwrap();
        let g = GridSpec::from_bbox(&merc, (merc.width() / 10.0, merc.height() / 10.0)).unwrap();
        let mask = Mask::Vector {
            polygons: vec![Polygon {
                exterior: vec![
                    (10.0, 50.0),
                    (10.1, 50.0),
                    (10.1, 50.1),
                    (10.0, 50.1),
                    (10.0, 50.0),
                ],
                holes: vec![],
            }],
            epsg: 4326,
        };
        let raster = rasterize(&mask, &g, InclusionRule::Centroid).unwrap();
        assert!(raster.buffer.iter().filter(|&&v| v == 1.0).count() > 50);
    }

    #[test]
    fn raster_mask_thresholds_to_binary() {
        let g = grid_4x4();
        let mut source = RasterWindow::filled(&g, 1, -9999.0);
        source.set(0, 0, 0, 2.0);
        source.set(1, 0, 0, 0.0);
        // (2, 0) stays nodata.
        let raster = rasterize(&Mask::Raster(source), &g, InclusionRule::Centroid).unwrap();
        assert_eq!(raster.get(0, 0, 0), Some(1.0));
        assert_eq!(raster.get(1, 0, 0), Some(0.0));
        assert_eq!(raster.get(2, 0, 0), Some(0.0));
    }

    #[test]
    fn apply_modes_truth_table() {
        let g = grid_4x4();
        let mut data = RasterWindow::filled(&g, 1, -9999.0);
        for v in data.buffer.iter_mut() {
            *v = 10.0;
        }
        data.set(3, 3, 0, -9999.0);
        let mask = rasterize(
            &Mask::Vector {
                polygons: vec![square(0.0, 2.0)],
                epsg: 3857,
            },
            &g,
            InclusionRule::Centroid,
        )
        .unwrap();

        let outside = apply(data.clone(), &mask, MaskMode::SetNodataOutside);
        assert_eq!(outside.get(0, 3, 0), Some(10.0)); // inside
        assert!(outside.is_nodata(outside.get(3, 0, 0).unwrap()));

        let inside = apply(data.clone(), &mask, MaskMode::SetNodataInside);
        assert!(inside.is_nodata(inside.get(0, 3, 0).unwrap()));
        assert_eq!(inside.get(3, 0, 0), Some(10.0));

        let scaled = apply(data.clone(), &mask, MaskMode::Multiply);
        assert_eq!(scaled.get(0, 3, 0), Some(10.0));
        assert_eq!(scaled.get(3, 0, 0), Some(0.0));
    }

    #[test]
    fn apply_never_creates_data() {
        let g = grid_4x4();
        let data = RasterWindow::filled(&g, 1, -9999.0); // all nodata
        let mut mask = RasterWindow::filled(&g, 1, -1.0);
        for v in mask.buffer.iter_mut() {
            *v = 1.0;
        }
        for mode in [
            MaskMode::SetNodataOutside,
            MaskMode::SetNodataInside,
            MaskMode::Multiply,
        ] {
            let out = apply(data.clone(), &mask, mode);
            assert!(out.is_empty(), "{mode:?} created data from nothing");
        }
    }
}
