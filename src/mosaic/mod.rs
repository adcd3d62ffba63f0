//! Merging reprojected windows into one raster.
//!
//! Every input must already sit exactly on the target grid; feeding this
//! module an off-grid window is a programming error upstream, not a runtime
//! condition, so the preconditions are assertions. Output is bit-identical
//! across runs for a fixed input order and policy, and the commutative
//! policies are additionally independent of input order.

use crate::geo::GridSpec;
use crate::raster::RasterWindow;
use serde::Deserialize;

/// How overlapping valid pixels resolve. `FirstWins`/`LastWins` use the
/// input order (the original query enumeration order, not completion
/// order); `MeanOfValid`/`MaxOfValid` are commutative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    FirstWins,
    LastWins,
    MeanOfValid,
    MaxOfValid,
}

/// The output adopts the first window's band count and nodata sentinel.
/// Each input's validity is judged against its own sentinel, so inputs may
/// disagree on the convention, but a valid sample equal to the output
/// sentinel is indistinguishable from nodata for downstream readers.
pub fn merge(windows: &[RasterWindow], grid: &GridSpec, policy: ConflictPolicy) -> RasterWindow {
    let bands = windows.first().map(|w| w.bands).unwrap_or(1);
    let nodata = windows.first().map(|w| w.nodata).unwrap_or(f32::NAN);
    for window in windows {
        assert!(
            window.is_on_grid(grid),
            "mosaic input off target grid: {window} vs {grid}"
        );
        assert_eq!(window.bands, bands, "mosaic inputs disagree on band count");
    }

    let mut out = RasterWindow::filled(grid, bands, nodata);
    match policy {
        ConflictPolicy::FirstWins => {
            // Filled pixels are tracked explicitly; comparing against the
            // output sentinel would let a valid sample equal to it be
            // overwritten by a later window.
            let mut filled = vec![false; out.buffer.len()];
            for window in windows {
                for (i, &v) in window.buffer.iter().enumerate() {
                    if !window.is_nodata(v) && !filled[i] {
                        out.buffer[i] = v;
                        filled[i] = true;
                    }
                }
            }
        }
        ConflictPolicy::LastWins => {
            for window in windows {
                for (i, &v) in window.buffer.iter().enumerate() {
                    if !window.is_nodata(v) {
                        out.buffer[i] = v;
                    }
                }
            }
        }
        ConflictPolicy::MeanOfValid | ConflictPolicy::MaxOfValid => {
            let mut values: Vec<f32> = Vec::with_capacity(windows.len());
            for i in 0..out.buffer.len() {
                values.clear();
                for window in windows {
                    let v = window.buffer[i];
                    if !window.is_nodata(v) {
                        values.push(v);
                    }
                }
                if values.is_empty() {
                    continue;
                }
                out.buffer[i] = match policy {
                    ConflictPolicy::MeanOfValid => {
                        // Summation order is fixed by sorting, which makes
                        // the mean independent of input permutation.
                        values.sort_by(|a, b| a.total_cmp(b));
                        let sum: f64 = values.iter().map(|&v| v as f64).sum();
                        (sum / values.len() as f64) as f32
                    }
                    ConflictPolicy::MaxOfValid => {
                        values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
                    }
                    _ => unreachable!(),
                };
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BoundingBox;

    fn grid_2x2() -> GridSpec {
        let bbox = BoundingBox::new(0.0, 0.0, 2.0, 2.0, 3857).unwrap();
        GridSpec::from_bbox(&bbox, (1.0, 1.0)).unwrap()
    }

    fn window(grid: &GridSpec, values: [f32; 4]) -> RasterWindow {
        let mut w = RasterWindow::filled(grid, 1, -9999.0);
        w.buffer.copy_from_slice(&values);
        w
    }

    #[test]
    fn mean_of_valid_averages_overlap() {
        let g = grid_2x2();
        let ones = window(&g, [1.0; 4]);
        let twos = window(&g, [2.0; 4]);
        let out = merge(&[ones, twos], &g, ConflictPolicy::MeanOfValid);
        assert_eq!(out.buffer, vec![1.5; 4]);
    }

    #[test]
    fn mean_of_valid_is_order_independent() {
        let g = grid_2x2();
        let a = window(&g, [0.1, 0.2, 0.3, -9999.0]);
        let b = window(&g, [10.7, -9999.0, 0.9, -9999.0]);
        let c = window(&g, [5.3, 1.1, -9999.0, 4.0]);
        let forward = merge(&[a.clone(), b.clone(), c.clone()], &g, ConflictPolicy::MeanOfValid);
        let backward = merge(&[c, b, a], &g, ConflictPolicy::MeanOfValid);
        assert_eq!(forward.buffer, backward.buffer);
    }

    #[test]
    fn first_wins_is_order_dependent() {
        let g = grid_2x2();
        let a = window(&g, [1.0; 4]);
        let b = window(&g, [2.0; 4]);
        let ab = merge(&[a.clone(), b.clone()], &g, ConflictPolicy::FirstWins);
        let ba = merge(&[b, a], &g, ConflictPolicy::FirstWins);
        assert_eq!(ab.buffer, vec![1.0; 4]);
        assert_eq!(ba.buffer, vec![2.0; 4]);
    }

    #[test]
    fn first_wins_fills_gaps_from_later_windows() {
        let g = grid_2x2();
        let a = window(&g, [1.0, -9999.0, 1.0, -9999.0]);
        let b = window(&g, [2.0, 2.0, -9999.0, -9999.0]);
        let out = merge(&[a, b], &g, ConflictPolicy::FirstWins);
        assert_eq!(out.buffer, vec![1.0, 2.0, 1.0, -9999.0]);
    }

    #[test]
    fn first_wins_keeps_valid_samples_equal_to_the_output_sentinel() {
        let g = grid_2x2();
        // Output sentinel comes from `a` (-9999); `b` uses NaN, so its
        // -9999.0 at pixel 0 is a legitimate sample and `c` must not
        // overwrite it.
        let a = window(&g, [-9999.0, 1.0, 1.0, 1.0]);
        let mut b = window(&g, [-9999.0, 2.0, 2.0, 2.0]);
        b.nodata = f32::NAN;
        let mut c = window(&g, [3.0, 3.0, 3.0, 3.0]);
        c.nodata = f32::NAN;
        let out = merge(&[a, b, c], &g, ConflictPolicy::FirstWins);
        assert_eq!(out.buffer, vec![-9999.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn last_wins_overwrites() {
        let g = grid_2x2();
        let a = window(&g, [1.0, 1.0, 1.0, -9999.0]);
        let b = window(&g, [2.0, -9999.0, 2.0, -9999.0]);
        let out = merge(&[a, b], &g, ConflictPolicy::LastWins);
        assert_eq!(out.buffer, vec![2.0, 1.0, 2.0, -9999.0]);
    }

    #[test]
    fn max_of_valid_ignores_nodata() {
        let g = grid_2x2();
        let a = window(&g, [1.0, 5.0, -9999.0, -9999.0]);
        let b = window(&g, [3.0, 2.0, 4.0, -9999.0]);
        let out = merge(&[a, b], &g, ConflictPolicy::MaxOfValid);
        assert_eq!(out.buffer, vec![3.0, 5.0, 4.0, -9999.0]);
    }

    #[test]
    fn empty_input_yields_all_nodata() {
        let g = grid_2x2();
        let out = merge(&[], &g, ConflictPolicy::MeanOfValid);
        assert!(out.is_empty());
    }

    #[test]
    #[should_panic(expected = "off target grid")]
    fn off_grid_window_is_a_programming_error() {
        let g = grid_2x2();
        let mut w = window(&g, [1.0; 4]);
        w.origin = (100.0, 100.0);
        merge(&[w], &g, ConflictPolicy::FirstWins);
    }
}
