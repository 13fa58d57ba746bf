use crate::raster::{PixelValue, Raster};

/// Bilinear interpolation of a raster at a fractional coordinate.
///
/// # Arguments
///
/// * `raster` - The input raster.
/// * `u` - The x (column) coordinate of the sample.
/// * `v` - The y (row) coordinate of the sample.
///
/// # Returns
///
/// The interpolated sample, or `None` when (u, v) falls outside the raster.
pub fn bilinear_sample<T: PixelValue>(raster: &Raster<T>, u: f64, v: f64) -> Option<f64> {
    let (rows, cols) = (raster.rows(), raster.cols());

    if u < 0.0 || v < 0.0 || u > (cols - 1) as f64 || v > (rows - 1) as f64 {
        return None;
    }

    let iu0 = (u.trunc() as usize).min(cols - 1);
    let iv0 = (v.trunc() as usize).min(rows - 1);
    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let frac_u = u.fract();
    let frac_v = v.fract();
    let frac_uu = 1.0 - frac_u;
    let frac_vv = 1.0 - frac_v;

    let w00 = frac_uu * frac_vv;
    let w01 = frac_u * frac_vv;
    let w10 = frac_uu * frac_v;
    let w11 = frac_u * frac_v;

    let p00 = raster.value(iu0, iv0);
    let p01 = raster.value(iu1, iv0);
    let p10 = raster.value(iu0, iv1);
    let p11 = raster.value(iu1, iv1);

    Some(p00 * w00 + p01 * w01 + p10 * w10 + p11 * w11)
}
