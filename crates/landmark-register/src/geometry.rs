//! Pixel to 3D conversion seam.
//!
//! Map projection and datum math live outside the core; registration only
//! needs a way to lift a sub-pixel raster location to a 3D point in the
//! map's local frame, failing when the pixel carries no valid elevation.

use landmark_raster::{interpolation::bilinear_sample, NoDataMask, Raster};

/// Conversion from sub-pixel raster coordinates to 3D points in the map's
/// local frame.
pub trait MapGeometry {
    /// Lift a (col, row) pixel location to a 3D point.
    ///
    /// Returns `None` when the location falls outside the raster or its
    /// elevation is flagged invalid.
    fn pixel_to_world(&self, col: f64, row: f64) -> Option<[f64; 3]>;
}

/// Planar tangent-frame geometry: the map plane is the local x/y plane with
/// a fixed meters-per-pixel scale, and the elevation raster supplies z.
pub struct PlanarGeometry<'a> {
    scale: f64,
    elevation: &'a Raster<f32>,
    mask: &'a NoDataMask,
}

impl<'a> PlanarGeometry<'a> {
    /// Create a planar geometry over an elevation raster and its validity
    /// mask.
    pub fn new(scale: f64, elevation: &'a Raster<f32>, mask: &'a NoDataMask) -> Self {
        Self {
            scale,
            elevation,
            mask,
        }
    }
}

impl MapGeometry for PlanarGeometry<'_> {
    fn pixel_to_world(&self, col: f64, row: f64) -> Option<[f64; 3]> {
        let c = col.round();
        let r = row.round();
        if c < 0.0 || r < 0.0 || !self.mask.is_valid(c as usize, r as usize) {
            return None;
        }
        let elevation = bilinear_sample(self.elevation, col, row)?;
        if !elevation.is_finite() {
            return None;
        }
        Some([col * self.scale, row * self.scale, elevation])
    }
}
