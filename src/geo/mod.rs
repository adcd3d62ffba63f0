//! Coordinate reference systems and output grid geometry.
//!
//! Everything downstream of configuration shares these types: a
//! [`BoundingBox`] names the harvest region, a [`GridSpec`] pins the output
//! pixel grid, and [`Crs`] wraps proj4rs so the rest of the crate never
//! touches projection internals directly.

use proj4rs::errors::Error as Proj4Error;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

mod bbox;
mod grid;

pub use bbox::BoundingBox;
pub use grid::GridSpec;

#[derive(Debug)]
pub enum GeoError {
    UnsupportedCrs(u16),
    Proj4Error(Proj4Error),
    InvalidBounds((f64, f64, f64, f64)),
    InvalidResolution((f64, f64)),
    EmptyGrid,
}

impl std::fmt::Display for GeoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for GeoError {}

impl From<Proj4Error> for GeoError {
    fn from(e: Proj4Error) -> Self {
        GeoError::Proj4Error(e)
    }
}

/// A resolved coordinate reference system.
///
/// proj4rs works in radians for geographic systems, while the rest of this
/// crate (and every config file) speaks degrees. `Crs` owns that conversion
/// so callers transform plain world coordinates in both directions.
#[derive(Clone, Debug)]
pub struct Crs {
    epsg: u16,
    proj: Proj,
    geographic: bool,
}

impl Crs {
    pub fn from_epsg(epsg: u16) -> Result<Self, GeoError> {
        let proj = Proj::from_epsg_code(epsg).map_err(|_| GeoError::UnsupportedCrs(epsg))?;
        let geographic = proj.is_latlong();
        Ok(Self {
            epsg,
            proj,
            geographic,
        })
    }

    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    pub fn is_geographic(&self) -> bool {
        self.geographic
    }

    /// Transform a world coordinate from this CRS into `dst`.
    pub fn transform_to(&self, dst: &Crs, x: f64, y: f64) -> Result<(f64, f64), GeoError> {
        if self.epsg == dst.epsg {
            return Ok((x, y));
        }
        let mut point = if self.geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(&self.proj, &dst.proj, &mut point)?;
        if dst.geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// Transform a batch of points in place. Points that fail to transform
    /// (e.g. outside the projection domain) are set to NaN rather than
    /// aborting the batch.
    pub fn transform_points_to(&self, dst: &Crs, points: &mut [(f64, f64)]) {
        if self.epsg == dst.epsg {
            return;
        }
        for p in points.iter_mut() {
            match self.transform_to(dst, p.0, p.1) {
                Ok(q) => *p = q,
                Err(_) => *p = (f64::NAN, f64::NAN),
            }
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}
