//! Interest-point selection.
//!
//! A Forstner-style operator scores every pixel, then a spatial-grid
//! non-maximum suppression keeps one representative per cell and a greedy
//! spacing pass picks up to `max_features` well-distributed points.

use landmark_raster::{PixelValue, Raster, RasterSize};

use crate::params::DetectorParams;

/// A selected interest point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// Column of the feature, in pixels.
    pub col: usize,
    /// Row of the feature, in pixels.
    pub row: usize,
    /// Interest strength of the feature.
    pub strength: f32,
}

/// A rectangular sub-region of a raster, in pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    /// Leftmost column of the region.
    pub col: usize,
    /// Topmost row of the region.
    pub row: usize,
    /// Width of the region in pixels.
    pub width: usize,
    /// Height of the region in pixels.
    pub height: usize,
}

impl Region {
    /// The full extent of a raster.
    pub fn full(size: RasterSize) -> Self {
        Self {
            col: 0,
            row: 0,
            width: size.width,
            height: size.height,
        }
    }

    fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.col
            && row >= self.row
            && col < self.col + self.width
            && row < self.row + self.height
    }
}

/// Per-pixel interest scoring. The selection logic below treats the scorer
/// as a collaborator; any detector producing a dense score map fits.
pub trait InterestOperator {
    /// Score every pixel of the raster. The returned vector is row-major and
    /// parallel to the raster data.
    fn score<T: PixelValue>(&self, raster: &Raster<T>) -> Vec<f32>;
}

/// Forstner interest operator.
///
/// Accumulates the gradient structure tensor over a square neighborhood and
/// scores each pixel with `det / trace`, gated on the roundness measure
/// `4 det / trace^2` so edges do not score.
#[derive(Debug, Clone)]
pub struct ForstnerOperator {
    /// Side length of the accumulation neighborhood. Even values are bumped
    /// to the next odd value so the window stays centered.
    pub window_size: usize,
    /// Minimum roundness for a pixel to receive a score.
    pub min_roundness: f32,
}

impl Default for ForstnerOperator {
    fn default() -> Self {
        Self {
            window_size: 7,
            min_roundness: 0.3,
        }
    }
}

impl InterestOperator for ForstnerOperator {
    fn score<T: PixelValue>(&self, raster: &Raster<T>) -> Vec<f32> {
        let (cols, rows) = (raster.cols(), raster.rows());
        let mut scores = vec![0.0f32; cols * rows];
        if cols < 3 || rows < 3 {
            return scores;
        }

        let window = if self.window_size % 2 == 0 {
            self.window_size + 1
        } else {
            self.window_size
        };
        let half = (window / 2) as i64;

        // central-difference gradient products
        let mut gxx = vec![0.0f64; cols * rows];
        let mut gyy = vec![0.0f64; cols * rows];
        let mut gxy = vec![0.0f64; cols * rows];
        for r in 1..rows - 1 {
            for c in 1..cols - 1 {
                let gx = (raster.value(c + 1, r) - raster.value(c - 1, r)) / 2.0;
                let gy = (raster.value(c, r + 1) - raster.value(c, r - 1)) / 2.0;
                let idx = r * cols + c;
                gxx[idx] = gx * gx;
                gyy[idx] = gy * gy;
                gxy[idx] = gx * gy;
            }
        }

        for r in 0..rows {
            for c in 0..cols {
                let mut sxx = 0.0;
                let mut syy = 0.0;
                let mut sxy = 0.0;
                for wr in -half..=half {
                    for wc in -half..=half {
                        let rr = r as i64 + wr;
                        let cc = c as i64 + wc;
                        if rr < 0 || cc < 0 || rr >= rows as i64 || cc >= cols as i64 {
                            continue;
                        }
                        let idx = rr as usize * cols + cc as usize;
                        sxx += gxx[idx];
                        syy += gyy[idx];
                        sxy += gxy[idx];
                    }
                }
                let trace = sxx + syy;
                if trace <= 0.0 {
                    continue;
                }
                let det = sxx * syy - sxy * sxy;
                let roundness = 4.0 * det / (trace * trace);
                if roundness as f32 >= self.min_roundness {
                    scores[r * cols + c] = (det / trace) as f32;
                }
            }
        }

        scores
    }
}

/// Select up to `max_features` well-distributed interest points.
///
/// The region is partitioned into a square grid whose cell size starts at
/// `min_dist - 1` and grows until the cell count drops below
/// `grid_cell_cap`. Only the single best positive-score pixel of each cell
/// survives; survivors are sorted by descending strength and accepted
/// greedily, rejecting any candidate closer than `min_dist / sqrt(2)` to an
/// already-accepted point on both axes.
pub fn select_features(
    scores: &[f32],
    size: RasterSize,
    region: Region,
    params: &DetectorParams,
) -> Vec<Feature> {
    debug_assert_eq!(scores.len(), size.num_pixels());
    if region.width == 0 || region.height == 0 {
        return Vec::new();
    }

    let area = region.width * region.height;
    let mut cell = (params.min_dist as usize).saturating_sub(1).max(1);
    while area / (cell * cell) > params.grid_cell_cap {
        cell += 1;
    }

    let grid_cols = region.width.div_ceil(cell);
    let grid_rows = region.height.div_ceil(cell);
    let mut cells: Vec<Option<Feature>> = vec![None; grid_cols * grid_rows];

    for row in region.row..(region.row + region.height).min(size.height) {
        for col in region.col..(region.col + region.width).min(size.width) {
            let strength = scores[row * size.width + col];
            if strength <= 0.0 {
                continue;
            }
            let cell_idx =
                (row - region.row) / cell * grid_cols + (col - region.col) / cell;
            let best = &mut cells[cell_idx];
            if best.map_or(true, |f| strength > f.strength) {
                *best = Some(Feature {
                    col,
                    row,
                    strength,
                });
            }
        }
    }

    let mut candidates: Vec<Feature> = cells.into_iter().flatten().collect();
    candidates.sort_unstable_by(|a, b| b.strength.total_cmp(&a.strength));

    let axis_dist = params.min_dist / std::f64::consts::SQRT_2;
    let mut accepted: Vec<Feature> = Vec::new();
    for cand in candidates {
        if accepted.len() >= params.max_features {
            break;
        }
        if !region.contains(cand.col, cand.row) {
            continue;
        }
        let too_close = accepted.iter().any(|f| {
            let dc = (cand.col as f64 - f.col as f64).abs();
            let dr = (cand.row as f64 - f.row as f64).abs();
            dc < axis_dist && dr < axis_dist
        });
        if !too_close {
            accepted.push(cand);
        }
    }

    accepted
}

/// Score a raster and select features in one step.
pub fn detect_features<T: PixelValue>(
    raster: &Raster<T>,
    operator: &impl InterestOperator,
    region: Region,
    params: &DetectorParams,
) -> Vec<Feature> {
    let scores = operator.score(raster);
    select_features(&scores, raster.size(), region, params)
}
