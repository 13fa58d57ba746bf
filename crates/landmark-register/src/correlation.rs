//! Dense patch correlation with sub-pixel refinement.
//!
//! A square template extracted from the base raster is scanned over a square
//! search region of the child raster. Each candidate offset is scored with a
//! normalized cross-correlation that reaches 1.0 at a perfect match, and the
//! best integer-pixel peak is refined with a biquadratic fit over its 3x3
//! score neighborhood.

use landmark_raster::{PixelValue, Raster};

use crate::params::MatchParams;

/// Threshold under which the biquadratic peak is considered ill-conditioned.
const PEAK_DENOM_EPS: f64 = 1e-6;

/// A refined correlation peak inside a search region.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationPeak {
    /// Refined column of the template center, in search-region coordinates.
    pub col: f64,
    /// Refined row of the template center, in search-region coordinates.
    pub row: f64,
    /// Interpolated correlation value at the refined peak.
    pub correlation: f64,
    /// Curvature terms `[a_xx, a_yy, a_xy]` of the fitted biquadratic,
    /// usable as an uncertainty descriptor downstream.
    pub curvature: [f64; 3],
}

/// A sub-pixel correspondence between a base point and a child point.
#[derive(Debug, Clone, Copy)]
pub struct PointMatch {
    /// Matched location in the base raster, in pixels (col, row).
    pub base_point: [f64; 2],
    /// Matched location in the child raster, in pixels (col, row).
    pub child_point: [f64; 2],
    /// Interpolated correlation value of the match.
    pub correlation: f64,
    /// Curvature descriptor of the correlation peak.
    pub curvature: [f64; 3],
}

/// Compute the normalized correlation surface of a template over a search
/// region.
///
/// Both buffers are row-major. The returned surface has side
/// `search_size - template_size + 1`; entry (dr, dc) scores the template
/// placed with its top-left corner at (dc, dr) inside the search region.
///
/// The per-offset score is `2 * cov(a, b) / (norm_a + norm_b)` with
/// `norm_x = sum(x^2) - sum(x)^2 / n`, which is 1.0 when the windows match
/// exactly. Column sums of the search window slide down one row at a time so
/// the window statistics update incrementally.
///
/// Offsets whose search window has zero variance cannot be scored and stay
/// at negative infinity.
///
/// Returns `None` when the template has zero variance (`norm_a == 0`) or the
/// search region is smaller than the template in either axis.
pub fn correlation_surface(
    template: &[f64],
    template_size: usize,
    search: &[f64],
    search_size: usize,
) -> Option<Vec<f64>> {
    if template_size == 0 || search_size < template_size {
        return None;
    }
    debug_assert_eq!(template.len(), template_size * template_size);
    debug_assert_eq!(search.len(), search_size * search_size);

    let t = template_size;
    let s = search_size;
    let n = (t * t) as f64;

    let mut sum_a = 0.0;
    let mut sum_aa = 0.0;
    for &a in template {
        sum_a += a;
        sum_aa += a * a;
    }
    let norm_a = sum_aa - sum_a * sum_a / n;
    if norm_a <= 0.0 {
        // flat template cannot be localized
        return None;
    }

    let side = s - t + 1;
    let mut scores = vec![f64::NEG_INFINITY; side * side];

    // per-column sums of the search window rows [dr, dr + t)
    let mut col_sum = vec![0.0; s];
    let mut col_sum_sq = vec![0.0; s];
    for c in 0..s {
        for r in 0..t {
            let b = search[r * s + c];
            col_sum[c] += b;
            col_sum_sq[c] += b * b;
        }
    }

    for dr in 0..side {
        if dr > 0 {
            // slide the column sums down one row
            for c in 0..s {
                let leaving = search[(dr - 1) * s + c];
                let entering = search[(dr + t - 1) * s + c];
                col_sum[c] += entering - leaving;
                col_sum_sq[c] += entering * entering - leaving * leaving;
            }
        }

        // window sums over columns [dc, dc + t), sliding across dc
        let mut sum_b: f64 = col_sum[..t].iter().sum();
        let mut sum_bb: f64 = col_sum_sq[..t].iter().sum();

        for dc in 0..side {
            if dc > 0 {
                sum_b += col_sum[dc + t - 1] - col_sum[dc - 1];
                sum_bb += col_sum_sq[dc + t - 1] - col_sum_sq[dc - 1];
            }

            let norm_b = sum_bb - sum_b * sum_b / n;
            if norm_b <= 0.0 {
                continue;
            }

            let mut sum_ab = 0.0;
            for r in 0..t {
                let search_row = &search[(dr + r) * s + dc..(dr + r) * s + dc + t];
                let template_row = &template[r * t..(r + 1) * t];
                for (a, b) in template_row.iter().zip(search_row.iter()) {
                    sum_ab += a * b;
                }
            }

            let cov = sum_ab - sum_a * sum_b / n;
            scores[dr * side + dc] = 2.0 * cov / (norm_a + norm_b);
        }
    }

    Some(scores)
}

/// Refine the integer peak of a correlation surface to sub-pixel precision.
///
/// Fits a biquadratic
/// `f(x, y) = a_xx x^2 + a_yy y^2 + a_xy x y + a_x x + a_y y + a_0`
/// by least squares over the 3x3 neighborhood of the peak (closed forms over
/// the unit grid) and solves for the stationary point.
///
/// Fails when the peak lies on the surface border, any neighbor is unscored,
/// the peak is not a strict local maximum, the quadratic denominator
/// `4 a_xx a_yy - a_xy^2` is near zero, or the solved offset is a full pixel
/// or more in either axis.
pub fn refine_peak(
    scores: &[f64],
    side: usize,
    peak_col: usize,
    peak_row: usize,
) -> Option<CorrelationPeak> {
    if peak_col == 0 || peak_row == 0 || peak_col + 1 >= side || peak_row + 1 >= side {
        return None;
    }

    let center = scores[peak_row * side + peak_col];
    let mut neighborhood = [0.0; 9];
    for (k, item) in neighborhood.iter_mut().enumerate() {
        let (dy, dx) = ((k / 3) as i64 - 1, (k % 3) as i64 - 1);
        let value = scores[(peak_row as i64 + dy) as usize * side + (peak_col as i64 + dx) as usize];
        if !value.is_finite() {
            // an unscored neighbor would poison the moment sums
            return None;
        }
        if (dx != 0 || dy != 0) && value >= center {
            // not a strict local maximum
            return None;
        }
        *item = value;
    }

    // moment sums over the unit 3x3 grid
    let mut s0 = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (k, &f) in neighborhood.iter().enumerate() {
        let (y, x) = ((k / 3) as f64 - 1.0, (k % 3) as f64 - 1.0);
        s0 += f;
        sx += f * x;
        sy += f * y;
        sxy += f * x * y;
        sxx += f * x * x;
        syy += f * y * y;
    }

    // closed-form least squares coefficients
    let a_xx = sxx / 2.0 - s0 / 3.0;
    let a_yy = syy / 2.0 - s0 / 3.0;
    let a_xy = sxy / 4.0;
    let a_x = sx / 6.0;
    let a_y = sy / 6.0;
    let a_0 = (5.0 * s0 - 3.0 * sxx - 3.0 * syy) / 9.0;

    // inverted guards so NaN never slips through
    let denom = 4.0 * a_xx * a_yy - a_xy * a_xy;
    if !(denom.abs() >= PEAK_DENOM_EPS) {
        return None;
    }

    let dx = (a_xy * a_y - 2.0 * a_yy * a_x) / denom;
    let dy = (a_xy * a_x - 2.0 * a_xx * a_y) / denom;
    if !(dx.abs() < 1.0 && dy.abs() < 1.0) {
        // refinement left the trusted region around the integer peak
        return None;
    }

    let value = a_xx * dx * dx + a_yy * dy * dy + a_xy * dx * dy + a_x * dx + a_y * dy + a_0;

    Some(CorrelationPeak {
        col: peak_col as f64 + dx,
        row: peak_row as f64 + dy,
        correlation: value,
        curvature: [a_xx, a_yy, a_xy],
    })
}

/// Correlate a template against a search region and refine the best peak.
///
/// The returned peak locates the template *center*, in search-region
/// coordinates.
pub fn correlate(
    template: &[f64],
    template_size: usize,
    search: &[f64],
    search_size: usize,
) -> Option<CorrelationPeak> {
    let scores = correlation_surface(template, template_size, search, search_size)?;
    let side = search_size - template_size + 1;

    let mut best = (0usize, 0usize, f64::NEG_INFINITY);
    for r in 0..side {
        for c in 0..side {
            let v = scores[r * side + c];
            if v > best.2 {
                best = (c, r, v);
            }
        }
    }

    let peak = refine_peak(&scores, side, best.0, best.1)?;
    let half = (template_size / 2) as f64;
    Some(CorrelationPeak {
        col: peak.col + half,
        row: peak.row + half,
        ..peak
    })
}

/// Match a single base-raster point against the child raster.
///
/// Extracts a `template_size` square around `base_point` from the base
/// raster and a `search_size` square around `predicted` (the approximate
/// transform's guess) from the child raster, then correlates. The matched
/// child location is reported in absolute child-raster coordinates.
///
/// Returns `None` when a window falls outside its raster, the template is
/// flat, the peak cannot be refined, or the interpolated correlation falls
/// below `params.min_correlation`.
pub fn match_point<T: PixelValue>(
    base: &Raster<T>,
    child: &Raster<T>,
    base_point: [i64; 2],
    predicted: [f64; 2],
    params: &MatchParams,
) -> Option<PointMatch> {
    let t = params.template_size;
    let s = params.search_size;
    if t % 2 == 0 || s % 2 == 0 || s < t {
        return None;
    }

    let template = extract_window(base, base_point[0], base_point[1], t)?;
    let pred_col = predicted[0].round() as i64;
    let pred_row = predicted[1].round() as i64;
    let search = extract_window(child, pred_col, pred_row, s)?;

    let peak = correlate(&template, t, &search, s)?;
    if !(peak.correlation >= params.min_correlation) {
        return None;
    }

    let half_s = (s / 2) as f64;
    Some(PointMatch {
        base_point: [base_point[0] as f64, base_point[1] as f64],
        child_point: [
            pred_col as f64 - half_s + peak.col,
            pred_row as f64 - half_s + peak.row,
        ],
        correlation: peak.correlation,
        curvature: peak.curvature,
    })
}

/// Extract a square window centered at (col, row) as a row-major f64 buffer.
///
/// Returns `None` when the window is not fully inside the raster.
fn extract_window<T: PixelValue>(
    raster: &Raster<T>,
    col: i64,
    row: i64,
    size: usize,
) -> Option<Vec<f64>> {
    let half = (size / 2) as i64;
    if col - half < 0
        || row - half < 0
        || col + half >= raster.cols() as i64
        || row + half >= raster.rows() as i64
    {
        return None;
    }

    let mut window = Vec::with_capacity(size * size);
    for r in (row - half)..=(row + half) {
        for c in (col - half)..=(col + half) {
            window.push(raster.value(c as usize, r as usize));
        }
    }
    Some(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use landmark_raster::RasterSize;

    /// Smooth blob image so correlation surfaces are well conditioned.
    fn blob_raster(width: usize, height: usize, cx: f64, cy: f64) -> Raster<f32> {
        Raster::from_fn(
            RasterSize { width, height },
            |c, r| {
                let dx = c as f64 - cx;
                let dy = r as f64 - cy;
                (255.0 * (-(dx * dx + dy * dy) / 50.0).exp()) as f32
            },
        )
    }

    #[test]
    fn test_self_match_identity() {
        let raster = blob_raster(41, 41, 20.0, 20.0);
        let params = MatchParams {
            template_size: 11,
            search_size: 21,
            min_correlation: 0.3,
        };
        let m = match_point(&raster, &raster, [20, 20], [20.0, 20.0], &params).unwrap();
        assert_relative_eq!(m.correlation, 1.0, epsilon = 1e-3);
        assert_relative_eq!(m.child_point[0], 20.0, epsilon = 1e-6);
        assert_relative_eq!(m.child_point[1], 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_flat_template_rejected() {
        let template = vec![3.0; 25];
        let search: Vec<f64> = (0..81).map(|i| i as f64).collect();
        assert!(correlation_surface(&template, 5, &search, 9).is_none());
    }

    #[test]
    fn test_search_smaller_than_template() {
        let template: Vec<f64> = (0..49).map(|i| i as f64).collect();
        let search = vec![0.0; 25];
        assert!(correlation_surface(&template, 7, &search, 5).is_none());
    }

    #[test]
    fn test_subpixel_bound() {
        let base = blob_raster(41, 41, 20.0, 20.0);
        // shift the blob by a fraction of a pixel
        let child = blob_raster(41, 41, 20.4, 19.7);
        let params = MatchParams {
            template_size: 11,
            search_size: 25,
            min_correlation: 0.1,
        };
        let m = match_point(&base, &child, [20, 20], [20.0, 20.0], &params).unwrap();
        // sub-pixel part of the offset stays below one pixel
        assert!((m.child_point[0] - 20.0).abs() < 1.0);
        assert!((m.child_point[1] - 20.0).abs() < 1.0);
        // and tracks the injected shift
        assert_relative_eq!(m.child_point[0], 20.4, epsilon = 0.2);
        assert_relative_eq!(m.child_point[1], 19.7, epsilon = 0.2);
    }

    #[test]
    fn test_integer_shift_recovered() {
        let base = blob_raster(51, 51, 25.0, 25.0);
        let child = blob_raster(51, 51, 28.0, 23.0);
        let params = MatchParams {
            template_size: 11,
            search_size: 27,
            min_correlation: 0.1,
        };
        let m = match_point(&base, &child, [25, 25], [25.0, 25.0], &params).unwrap();
        assert_relative_eq!(m.child_point[0], 28.0, epsilon = 0.05);
        assert_relative_eq!(m.child_point[1], 23.0, epsilon = 0.05);
    }

    #[test]
    fn test_unscored_offsets_disqualify_refinement() {
        // flat left columns leave the dc = 0 offsets unscored; the peak right
        // beside them must be rejected rather than folded into the fit
        let s = 7usize;
        let t = 5usize;
        let mut search = vec![1.0; s * s];
        for r in 0..s {
            search[r * s + 5] = (r as f64 * 0.9).sin() + 2.0;
            search[r * s + 6] = (r as f64 * 1.3).cos() - 1.5;
        }
        let mut template = vec![0.0; t * t];
        for r in 0..t {
            for c in 0..t {
                template[r * t + c] = search[(r + 1) * s + c + 1];
            }
        }

        let scores = correlation_surface(&template, t, &search, s).unwrap();
        let side = s - t + 1;
        // exact match at (1, 1), flat-window offsets at dc = 0 unscored
        assert_relative_eq!(scores[side + 1], 1.0, epsilon = 1e-9);
        assert!(!scores[side].is_finite());

        assert!(refine_peak(&scores, side, 1, 1).is_none());
        assert!(correlate(&template, t, &search, s).is_none());

        // the raster-level matcher must not surface NaN coordinates either
        let base = Raster::<f32>::from_fn(RasterSize { width: t, height: t }, |c, r| {
            template[r * t + c] as f32
        });
        let child = Raster::<f32>::from_fn(RasterSize { width: s, height: s }, |c, r| {
            search[r * s + c] as f32
        });
        let params = MatchParams {
            template_size: t,
            search_size: s,
            min_correlation: 0.5,
        };
        let m = match_point(&base, &child, [2, 2], [3.0, 3.0], &params);
        assert!(m.is_none());
    }

    #[test]
    fn test_border_peak_rejected() {
        // ramp image pushes the best score to the surface border
        let side = 5;
        let mut scores = vec![0.0; side * side];
        for (i, v) in scores.iter_mut().enumerate() {
            *v = i as f64;
        }
        assert!(refine_peak(&scores, side, 4, 4).is_none());
        assert!(refine_peak(&scores, side, 0, 2).is_none());
    }

    #[test]
    fn test_refine_peak_quadratic() {
        // exact quadratic with a known maximum at (0.3, -0.2) from center
        let side = 5;
        let (px, py) = (2.3f64, 1.8f64);
        let mut scores = vec![0.0; side * side];
        for r in 0..side {
            for c in 0..side {
                let dx = c as f64 - px;
                let dy = r as f64 - py;
                scores[r * side + c] = 1.0 - 0.1 * dx * dx - 0.2 * dy * dy;
            }
        }
        let peak = refine_peak(&scores, side, 2, 2).unwrap();
        assert_relative_eq!(peak.col, px, epsilon = 1e-9);
        assert_relative_eq!(peak.row, py, epsilon = 1e-9);
        assert_relative_eq!(peak.correlation, 1.0, epsilon = 1e-9);
        assert!(peak.curvature[0] < 0.0);
        assert!(peak.curvature[1] < 0.0);
    }

    #[test]
    fn test_window_outside_raster() {
        let raster = blob_raster(21, 21, 10.0, 10.0);
        let params = MatchParams {
            template_size: 11,
            search_size: 21,
            min_correlation: 0.0,
        };
        assert!(match_point(&raster, &raster, [2, 10], [10.0, 10.0], &params).is_none());
    }
}
