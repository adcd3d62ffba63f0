//! In-memory raster windows.
//!
//! A [`RasterWindow`] is the unit of hand-off between every pipeline stage:
//! adapters produce them, the reprojector consumes one and produces another,
//! the mosaicker merges many into one. Ownership is transferred at each
//! stage; a stage that needs a modified copy builds a new window.

use crate::geo::GridSpec;

#[derive(Debug)]
pub enum RasterError {
    BufferSize {
        expected: usize,
        actual: usize,
    },
    BandOutOfRange {
        band: u32,
        bands: u32,
    },
    BandCountMismatch(u32, u32),
    NotSupported(String),
}

impl std::fmt::Display for RasterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for RasterError {}

/// A georeferenced block of samples.
///
/// Samples are stored band-interleaved by pixel (`[b0, b1, .., b0, b1, ..]`,
/// row major). `origin` is the world coordinate of the top-left corner and
/// `pixel_size` components are both positive with y growing downward, the
/// same convention as [`GridSpec`]. `nodata` is compared NaN-safely.
#[derive(Clone, Debug)]
pub struct RasterWindow {
    pub width: u32,
    pub height: u32,
    pub bands: u32,
    pub buffer: Vec<f32>,
    pub epsg: u16,
    pub origin: (f64, f64),
    pub pixel_size: (f64, f64),
    pub nodata: f32,
}

impl RasterWindow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        bands: u32,
        buffer: Vec<f32>,
        epsg: u16,
        origin: (f64, f64),
        pixel_size: (f64, f64),
        nodata: f32,
    ) -> Result<Self, RasterError> {
        let expected = width as usize * height as usize * bands as usize;
        if buffer.len() != expected {
            return Err(RasterError::BufferSize {
                expected,
                actual: buffer.len(),
            });
        }
        Ok(Self {
            width,
            height,
            bands,
            buffer,
            epsg,
            origin,
            pixel_size,
            nodata,
        })
    }

    /// A window covering `grid` exactly, filled with nodata.
    pub fn filled(grid: &GridSpec, bands: u32, nodata: f32) -> Self {
        let len = grid.pixel_count() * bands as usize;
        Self {
            width: grid.width(),
            height: grid.height(),
            bands,
            buffer: vec![nodata; len],
            epsg: grid.epsg(),
            origin: grid.origin(),
            pixel_size: grid.pixel_size(),
            nodata,
        }
    }

    #[inline]
    fn index(&self, col: u32, row: u32, band: u32) -> usize {
        (row as usize * self.width as usize + col as usize) * self.bands as usize + band as usize
    }

    #[inline]
    pub fn get(&self, col: u32, row: u32, band: u32) -> Option<f32> {
        if col >= self.width || row >= self.height || band >= self.bands {
            return None;
        }
        Some(self.buffer[self.index(col, row, band)])
    }

    #[inline]
    pub fn set(&mut self, col: u32, row: u32, band: u32, value: f32) {
        if col < self.width && row < self.height && band < self.bands {
            let i = self.index(col, row, band);
            self.buffer[i] = value;
        }
    }

    /// Nodata comparison that also treats NaN nodata correctly
    /// (NaN != NaN under IEEE comparison).
    #[inline]
    pub fn is_nodata(&self, value: f32) -> bool {
        if self.nodata.is_nan() {
            value.is_nan()
        } else {
            value == self.nodata || value.is_nan()
        }
    }

    /// True when every sample in the window is nodata.
    pub fn is_empty(&self) -> bool {
        self.buffer.iter().all(|&v| self.is_nodata(v))
    }

    /// True when this window sits exactly on `grid`: same CRS, same
    /// alignment, same shape. Exact equality on purpose; the mosaicker
    /// treats anything less as a programming error.
    pub fn is_on_grid(&self, grid: &GridSpec) -> bool {
        self.epsg == grid.epsg()
            && self.width == grid.width()
            && self.height == grid.height()
            && self.origin == grid.origin()
            && self.pixel_size == grid.pixel_size()
    }

    /// All samples of one pixel, or None out of range.
    pub fn pixel(&self, col: u32, row: u32) -> Option<&[f32]> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let start = self.index(col, row, 0);
        Some(&self.buffer[start..start + self.bands as usize])
    }

    /// Count of pixels whose first band holds valid data.
    pub fn valid_pixels(&self) -> usize {
        let mut count = 0;
        for row in 0..self.height {
            for col in 0..self.width {
                if let Some(v) = self.get(col, row, 0) {
                    if !self.is_nodata(v) {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}

impl std::fmt::Display for RasterWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RasterWindow({}x{}x{}, EPSG:{}, nodata {})",
            self.width, self.height, self.bands, self.epsg, self.nodata
        )
    }
}
