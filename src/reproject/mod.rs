//! Resampling a raster window onto a target grid.
//!
//! Inverse mapping: every output pixel center is transformed back into the
//! source CRS and sampled there. Nodata acts as a mask during resampling,
//! never as a numeric value. Kernel weights over invalid samples are
//! dropped and the remainder renormalized, so nodata can not bleed into
//! interpolated values.

use crate::geo::{Crs, GeoError, GridSpec};
use crate::raster::RasterWindow;
use rayon::prelude::*;
use serde::Deserialize;

#[derive(Debug)]
pub enum ReprojectError {
    UnsupportedCrs(u16),
    GeoError(GeoError),
}

impl std::fmt::Display for ReprojectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ReprojectError {}

impl From<GeoError> for ReprojectError {
    fn from(e: GeoError) -> Self {
        match e {
            GeoError::UnsupportedCrs(code) => ReprojectError::UnsupportedCrs(code),
            other => ReprojectError::GeoError(other),
        }
    }
}

/// Continuous bands want `Bilinear`/`Cubic`; categorical bands must use
/// `Nearest` or `Mode` so no new class values are invented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    Nearest,
    Bilinear,
    Cubic,
    Mode,
}

/// Resample `window` onto `grid`.
///
/// A window already sitting exactly on the grid is returned unchanged under
/// `Nearest`, bit for bit. Pixels whose centers fall outside the source, or
/// whose every kernel contribution is nodata, come out as nodata.
pub fn reproject(
    window: &RasterWindow,
    grid: &GridSpec,
    resampling: Resampling,
) -> Result<RasterWindow, ReprojectError> {
    if resampling == Resampling::Nearest && window.is_on_grid(grid) {
        return Ok(window.clone());
    }

    let src_crs = Crs::from_epsg(window.epsg)?;
    let dst_crs = Crs::from_epsg(grid.epsg())?;

    let width = grid.width();
    let bands = window.bands;
    let mut out = RasterWindow::filled(grid, bands, window.nodata);
    let row_len = width as usize * bands as usize;

    out.buffer
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, row_buffer)| {
            let row = row as u32;
            let mut centers: Vec<(f64, f64)> =
                (0..width).map(|col| grid.pixel_center(col, row)).collect();
            dst_crs.transform_points_to(&src_crs, &mut centers);

            // Mode needs the output pixel footprint, not just its center.
            let corners = if resampling == Resampling::Mode {
                let mut top: Vec<(f64, f64)> =
                    (0..=width).map(|col| grid.pixel_corner(col, row)).collect();
                let mut bottom: Vec<(f64, f64)> = (0..=width)
                    .map(|col| grid.pixel_corner(col, row + 1))
                    .collect();
                dst_crs.transform_points_to(&src_crs, &mut top);
                dst_crs.transform_points_to(&src_crs, &mut bottom);
                Some((top, bottom))
            } else {
                None
            };

            for (col, &(x, y)) in centers.iter().enumerate() {
                if !(x.is_finite() && y.is_finite()) {
                    continue;
                }
                let fx = (x - window.origin.0) / window.pixel_size.0;
                let fy = (window.origin.1 - y) / window.pixel_size.1;
                for band in 0..bands {
                    let value = match resampling {
                        Resampling::Nearest => sample_nearest(window, fx, fy, band),
                        Resampling::Bilinear => sample_bilinear(window, fx, fy, band),
                        Resampling::Cubic => sample_cubic(window, fx, fy, band),
                        Resampling::Mode => match &corners {
                            Some((top, bottom)) => sample_mode(
                                window,
                                &[top[col], top[col + 1], bottom[col], bottom[col + 1]],
                                band,
                            ),
                            None => None,
                        },
                    };
                    if let Some(v) = value {
                        row_buffer[col * bands as usize + band as usize] = v;
                    }
                }
            }
        });

    Ok(out)
}

fn valid_sample(window: &RasterWindow, col: i64, row: i64, band: u32) -> Option<f32> {
    if col < 0 || row < 0 || col >= window.width as i64 || row >= window.height as i64 {
        return None;
    }
    let v = window.get(col as u32, row as u32, band)?;
    if window.is_nodata(v) {
        None
    } else {
        Some(v)
    }
}

/// Source pixel i covers fractional coordinates [i, i+1).
fn sample_nearest(window: &RasterWindow, fx: f64, fy: f64, band: u32) -> Option<f32> {
    valid_sample(window, fx.floor() as i64, fy.floor() as i64, band)
}

fn sample_bilinear(window: &RasterWindow, fx: f64, fy: f64, band: u32) -> Option<f32> {
    let gx = fx - 0.5;
    let gy = fy - 0.5;
    let x0 = gx.floor() as i64;
    let y0 = gy.floor() as i64;
    let dx = gx - x0 as f64;
    let dy = gy - y0 as f64;

    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for (sy, wy) in [(y0, 1.0 - dy), (y0 + 1, dy)] {
        for (sx, wx) in [(x0, 1.0 - dx), (x0 + 1, dx)] {
            let weight = wx * wy;
            if weight == 0.0 {
                continue;
            }
            if let Some(v) = valid_sample(window, sx, sy, band) {
                sum += weight * v as f64;
                weight_sum += weight;
            }
        }
    }
    if weight_sum > 0.0 {
        Some((sum / weight_sum) as f32)
    } else {
        None
    }
}

/// Catmull-Rom kernel (a = -0.5).
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        1.5 * t * t * t - 2.5 * t * t + 1.0
    } else if t < 2.0 {
        -0.5 * t * t * t + 2.5 * t * t - 4.0 * t + 2.0
    } else {
        0.0
    }
}

fn sample_cubic(window: &RasterWindow, fx: f64, fy: f64, band: u32) -> Option<f32> {
    let gx = fx - 0.5;
    let gy = fy - 0.5;
    let x0 = gx.floor() as i64;
    let y0 = gy.floor() as i64;

    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for j in -1..=2i64 {
        let wy = cubic_weight(gy - (y0 + j) as f64);
        for i in -1..=2i64 {
            let weight = cubic_weight(gx - (x0 + i) as f64) * wy;
            if weight == 0.0 {
                continue;
            }
            if let Some(v) = valid_sample(window, x0 + i, y0 + j, band) {
                sum += weight * v as f64;
                weight_sum += weight;
            }
        }
    }
    // Negative lobes can cancel when samples are missing; require a
    // meaningfully positive mass before renormalizing.
    if weight_sum > 1e-6 {
        Some((sum / weight_sum) as f32)
    } else {
        None
    }
}

/// Most frequent valid value among the source pixels covered by the output
/// pixel footprint. Ties break toward the value met first in row-major
/// order, which keeps the result deterministic.
fn sample_mode(window: &RasterWindow, corners: &[(f64, f64); 4], band: u32) -> Option<f32> {
    let mut min_fx = f64::INFINITY;
    let mut max_fx = f64::NEG_INFINITY;
    let mut min_fy = f64::INFINITY;
    let mut max_fy = f64::NEG_INFINITY;
    for &(x, y) in corners {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        let fx = (x - window.origin.0) / window.pixel_size.0;
        let fy = (window.origin.1 - y) / window.pixel_size.1;
        min_fx = min_fx.min(fx);
        max_fx = max_fx.max(fx);
        min_fy = min_fy.min(fy);
        max_fy = max_fy.max(fy);
    }

    let col0 = min_fx.floor() as i64;
    let col1 = (max_fx.ceil() as i64).max(col0 + 1);
    let row0 = min_fy.floor() as i64;
    let row1 = (max_fy.ceil() as i64).max(row0 + 1);

    let mut counts: Vec<(f32, u32)> = vec![];
    for row in row0..row1 {
        for col in col0..col1 {
            // Only pixels whose centers fall inside the footprint count.
            let cx = col as f64 + 0.5;
            let cy = row as f64 + 0.5;
            if cx < min_fx || cx > max_fx || cy < min_fy || cy > max_fy {
                continue;
            }
            if let Some(v) = valid_sample(window, col, row, band) {
                match counts.iter_mut().find(|(value, _)| *value == v) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((v, 1)),
                }
            }
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map(|(value, _)| value)
}
