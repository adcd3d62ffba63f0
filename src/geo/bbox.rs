use super::{Crs, GeoError};

/// An axis-aligned region in a named CRS.
///
/// Invariant: min < max on both axes, and the EPSG code resolves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub epsg: u16,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64, epsg: u16) -> Result<Self, GeoError> {
        if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite())
            || min_x >= max_x
            || min_y >= max_y
        {
            return Err(GeoError::InvalidBounds((min_x, min_y, max_x, max_y)));
        }
        let _ = Crs::from_epsg(epsg)?;
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
            epsg,
        })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Expand the box by `margin` world units on every side.
    pub fn buffered(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
            epsg: self.epsg,
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.epsg == other.epsg
            && self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
            epsg: self.epsg,
        })
    }

    /// Reproject to another CRS by transforming the corners plus edge
    /// midpoints and taking the envelope. Midpoints matter because projected
    /// edges bow outward under many transforms.
    pub fn to_crs(&self, epsg: u16) -> Result<BoundingBox, GeoError> {
        if epsg == self.epsg {
            return Ok(*self);
        }
        let src = Crs::from_epsg(self.epsg)?;
        let dst = Crs::from_epsg(epsg)?;
        let mid_x = (self.min_x + self.max_x) / 2.0;
        let mid_y = (self.min_y + self.max_y) / 2.0;
        let samples = [
            (self.min_x, self.min_y),
            (self.min_x, self.max_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (mid_x, self.min_y),
            (mid_x, self.max_y),
            (self.min_x, mid_y),
            (self.max_x, mid_y),
        ];
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (x, y) in samples {
            let (tx, ty) = src.transform_to(&dst, x, y)?;
            min_x = min_x.min(tx);
            min_y = min_y.min(ty);
            max_x = max_x.max(tx);
            max_y = max_y.max(ty);
        }
        BoundingBox::new(min_x, min_y, max_x, max_y, epsg)
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BoundingBox([{}, {}, {}, {}], EPSG:{})",
            self.min_x, self.min_y, self.max_x, self.max_y, self.epsg
        )
    }
}
