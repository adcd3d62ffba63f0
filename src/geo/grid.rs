use super::{BoundingBox, GeoError};

/// The output pixel grid for a harvest: CRS, resolution and alignment.
///
/// Derived deterministically from a [`BoundingBox`] plus a requested
/// resolution and immutable afterwards. The origin is the top-left corner
/// (`min_x`, `max_y`); pixel (0,0) is the top-left pixel and y grows
/// downward. Width and height are rounded up so the grid always covers the
/// full bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSpec {
    epsg: u16,
    origin: (f64, f64),
    pixel_size: (f64, f64),
    width: u32,
    height: u32,
}

impl GridSpec {
    pub fn from_bbox(bbox: &BoundingBox, pixel_size: (f64, f64)) -> Result<Self, GeoError> {
        if !(pixel_size.0.is_finite() && pixel_size.1.is_finite())
            || pixel_size.0 <= 0.0
            || pixel_size.1 <= 0.0
        {
            return Err(GeoError::InvalidResolution(pixel_size));
        }
        // Nudge by an epsilon so an exact-multiple extent does not gain a
        // row/column from floating point noise.
        let width = ((bbox.width() / pixel_size.0) - 1e-9).ceil() as u32;
        let height = ((bbox.height() / pixel_size.1) - 1e-9).ceil() as u32;
        if width == 0 || height == 0 {
            return Err(GeoError::EmptyGrid);
        }
        Ok(Self {
            epsg: bbox.epsg,
            origin: (bbox.min_x, bbox.max_y),
            pixel_size,
            width,
            height,
        })
    }

    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        self.pixel_size
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// World coordinate of the center of pixel (col, row).
    pub fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.origin.0 + (col as f64 + 0.5) * self.pixel_size.0,
            self.origin.1 - (row as f64 + 0.5) * self.pixel_size.1,
        )
    }

    /// World coordinate of the top-left corner of pixel (col, row).
    pub fn pixel_corner(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.origin.0 + col as f64 * self.pixel_size.0,
            self.origin.1 - row as f64 * self.pixel_size.1,
        )
    }

    /// Fractional pixel coordinate of a world point. (0,0) is the grid
    /// origin corner; may be negative or exceed the grid for points outside.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin.0) / self.pixel_size.0,
            (self.origin.1 - y) / self.pixel_size.1,
        )
    }

    /// Full grid extent as a bounding box.
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min_x: self.origin.0,
            min_y: self.origin.1 - self.height as f64 * self.pixel_size.1,
            max_x: self.origin.0 + self.width as f64 * self.pixel_size.0,
            max_y: self.origin.1,
            epsg: self.epsg,
        }
    }

    /// A grid with the same origin and CRS downsampled by `factor`,
    /// used for overview levels.
    pub fn downsampled(&self, factor: u32) -> GridSpec {
        GridSpec {
            epsg: self.epsg,
            origin: self.origin,
            pixel_size: (
                self.pixel_size.0 * factor as f64,
                self.pixel_size.1 * factor as f64,
            ),
            width: (self.width + factor - 1) / factor,
            height: (self.height + factor - 1) / factor,
        }
    }
}

impl std::fmt::Display for GridSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GridSpec({}x{} @ {}x{} units/px, EPSG:{})",
            self.width, self.height, self.pixel_size.0, self.pixel_size.1, self.epsg
        )
    }
}
