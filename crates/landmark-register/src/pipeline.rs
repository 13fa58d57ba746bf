//! Top-level registration pipeline.
//!
//! Detect interest points on the base map, correlate each against the child
//! map, fit a global homography robustly, lift the surviving pairs to 3D and
//! refine with a robust rigid fit, then apply the result to the child map's
//! anchor and orientation.

use landmark_raster::{NoDataMask, Raster, RasterError};

use crate::correlation::match_point;
use crate::error::RegisterError;
use crate::geometry::{MapGeometry, PlanarGeometry};
use crate::homography::{apply_homography, homography_ransac};
use crate::interest::{detect_features, InterestOperator, Region};
use crate::params::RegistrationParams;
use crate::rigid::{fit_rigid_ransac, RigidTransform, MIN_RIGID_POINTS};

/// A georeferenced landmark map: co-registered reflectance and elevation
/// rasters draped over a tangent plane, anchored in a body-fixed frame.
#[derive(Clone)]
pub struct LandmarkMap {
    /// Surface reflectance raster.
    pub reflectance: Raster<f32>,
    /// Elevation raster, parallel to the reflectance raster.
    pub elevation: Raster<f32>,
    /// Per-pixel elevation validity.
    pub mask: NoDataMask,
    /// Anchor point of the map's tangent plane in the body-fixed frame.
    pub anchor: [f64; 3],
    /// Orientation of the tangent plane in the body-fixed frame.
    pub orientation: [[f64; 3]; 3],
    /// Map scale in meters per pixel.
    pub scale: f64,
}

impl LandmarkMap {
    /// Create a map, checking that the rasters are co-registered.
    pub fn new(
        reflectance: Raster<f32>,
        elevation: Raster<f32>,
        anchor: [f64; 3],
        orientation: [[f64; 3]; 3],
        scale: f64,
    ) -> Result<Self, RasterError> {
        if reflectance.size() != elevation.size() {
            return Err(RasterError::SizeMismatch(
                reflectance.size().to_string(),
                elevation.size().to_string(),
            ));
        }
        let mask = NoDataMask::from_finite(&elevation);
        Ok(Self {
            reflectance,
            elevation,
            mask,
            anchor,
            orientation,
            scale,
        })
    }

    /// Planar tangent-frame geometry over this map's elevation.
    pub fn geometry(&self) -> PlanarGeometry<'_> {
        PlanarGeometry::new(self.scale, &self.elevation, &self.mask)
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// The rigid transform carrying the child map's frame onto the base
    /// map's frame.
    pub transform: RigidTransform,
    /// The child map's anchor after applying the transform.
    pub anchor: [f64; 3],
    /// The child map's orientation after applying the transform.
    pub orientation: [[f64; 3]; 3],
    /// Number of 3D inliers used in the final rigid refit.
    pub num_inliers: usize,
    /// Number of correlation correspondences fed to the homography fit.
    pub num_correspondences: usize,
}

/// Register a child map against a base map.
///
/// `seed` is an optional approximate homography carrying base pixels into
/// child pixels (identity when `None`). The interest operator scores the
/// base reflectance raster; matching, robust fitting and the rigid update
/// follow.
///
/// # Errors
///
/// Fails when feature detection yields no usable points, too few
/// correspondences survive correlation, the global homography RANSAC finds
/// no consistent set, or the rigid RANSAC fails its minimum-inlier gate.
pub fn register_maps(
    child: &LandmarkMap,
    base: &LandmarkMap,
    operator: &impl InterestOperator,
    params: &RegistrationParams,
    seed: Option<[[f64; 3]; 3]>,
) -> Result<RegistrationResult, RegisterError> {
    let seed = seed.unwrap_or([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    // 1. interest points on the base map
    let features = detect_features(
        &base.reflectance,
        operator,
        Region::full(base.reflectance.size()),
        &params.detector,
    );
    if features.is_empty() {
        return Err(RegisterError::NoFeatures);
    }
    log::debug!("detected {} interest points", features.len());

    // 2. correlate each feature against the child map
    let mut base_pts = Vec::with_capacity(features.len());
    let mut child_pts = Vec::with_capacity(features.len());
    for feature in &features {
        let p = [feature.col as f64, feature.row as f64];
        let Ok(predicted) = apply_homography(&seed, &p) else {
            continue;
        };
        if let Some(m) = match_point(
            &base.reflectance,
            &child.reflectance,
            [feature.col as i64, feature.row as i64],
            predicted,
            &params.matching,
        ) {
            base_pts.push(m.base_point);
            child_pts.push(m.child_point);
        }
    }
    log::debug!("{} / {} features matched", base_pts.len(), features.len());

    // 3. global homography
    let homography = homography_ransac(&base_pts, &child_pts, &params.homography_ransac)?;

    // 4. lift the homography inliers to 3D
    let base_geometry = base.geometry();
    let child_geometry = child.geometry();
    let mut base_world = Vec::with_capacity(homography.inliers.len());
    let mut child_world = Vec::with_capacity(homography.inliers.len());
    for &idx in &homography.inliers {
        let (Some(b), Some(c)) = (
            base_geometry.pixel_to_world(base_pts[idx][0], base_pts[idx][1]),
            child_geometry.pixel_to_world(child_pts[idx][0], child_pts[idx][1]),
        ) else {
            continue;
        };
        base_world.push(b);
        child_world.push(c);
    }
    if base_world.len() < MIN_RIGID_POINTS {
        return Err(RegisterError::InsufficientInliers {
            required: MIN_RIGID_POINTS,
            actual: base_world.len(),
        });
    }

    // 5. robust rigid refinement: child frame -> base frame
    let rigid = fit_rigid_ransac(&child_world, &base_world, &params.rigid_ransac)?;

    // 6. apply to the child map's anchor and orientation
    let anchor = rigid.transform.apply(&child.anchor);
    let mut orientation = [[0.0; 3]; 3];
    landmark_linalg::mat3::matmul33(
        &rigid.transform.rotation,
        &child.orientation,
        &mut orientation,
    );

    log::debug!(
        "registration: {} correspondences, {} rigid inliers",
        base_pts.len(),
        rigid.inliers.len()
    );

    Ok(RegistrationResult {
        transform: rigid.transform,
        anchor,
        orientation,
        num_inliers: rigid.inliers.len(),
        num_correspondences: base_pts.len(),
    })
}
