//! Closed-form rotation + translation fitting between 3D point sets, with a
//! RANSAC wrapper for outlier-contaminated correspondence sets.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use landmark_linalg::{mat3, rotation::nearest_rotation};

use crate::error::RegisterError;
use crate::params::RansacParams;

/// Minimum points for a closed-form rigid fit.
pub const MIN_RIGID_POINTS: usize = 3;

/// Minimum surviving inliers for the RANSAC refit; models with fewer are
/// rejected outright so downstream consumers never see a near-empty inlier
/// set.
pub const MIN_RIGID_INLIERS: usize = 7;

/// A rigid transform: proper rotation plus translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Orthonormal rotation matrix with determinant +1.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl RigidTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Apply the transform to a 3D point.
    pub fn apply(&self, p: &[f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        mat3::mat33_mul_vec3(&self.rotation, p, &mut out);
        [
            out[0] + self.translation[0],
            out[1] + self.translation[1],
            out[2] + self.translation[2],
        ]
    }

    /// Compose with another transform: `self` applied after `other`.
    pub fn compose(&self, other: &Self) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        mat3::matmul33(&self.rotation, &other.rotation, &mut rotation);
        let translation = self.apply(&other.translation);
        Self {
            rotation,
            translation,
        }
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Self {
        let rotation = mat3::transpose33(&self.rotation);
        let mut t_rot = [0.0; 3];
        mat3::mat33_mul_vec3(&rotation, &self.translation, &mut t_rot);
        Self {
            rotation,
            translation: [-t_rot[0], -t_rot[1], -t_rot[2]],
        }
    }
}

/// Result of a robust rigid fit.
#[derive(Debug, Clone)]
pub struct RigidRansacResult {
    /// The fitted transform mapping src points onto dst points.
    pub transform: RigidTransform,
    /// Indices of the correspondences used in the final refit.
    pub inliers: Vec<usize>,
}

/// Fit a rigid transform between two corresponding 3D point sets.
///
/// Centers both sets on their centroids, accumulates the cross-covariance
/// `sum (dst - dst_mean)(src - src_mean)^T`, projects it onto the nearest
/// proper rotation and derives the translation as
/// `t = dst_mean - R * src_mean`.
///
/// # Arguments
///
/// * `src` - The source 3D points.
/// * `dst` - The destination 3D points, parallel to `src`.
pub fn fit_rigid(src: &[[f64; 3]], dst: &[[f64; 3]]) -> Result<RigidTransform, RegisterError> {
    if src.len() != dst.len() {
        return Err(RegisterError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }
    if src.len() < MIN_RIGID_POINTS {
        return Err(RegisterError::InsufficientCorrespondences {
            required: MIN_RIGID_POINTS,
            actual: src.len(),
        });
    }

    let n = src.len() as f64;
    let mut src_mean = [0.0; 3];
    let mut dst_mean = [0.0; 3];
    for (s, d) in src.iter().zip(dst.iter()) {
        for k in 0..3 {
            src_mean[k] += s[k] / n;
            dst_mean[k] += d[k] / n;
        }
    }

    let mut cov = [[0.0; 3]; 3];
    for (s, d) in src.iter().zip(dst.iter()) {
        for (i, row) in cov.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v += (d[i] - dst_mean[i]) * (s[j] - src_mean[j]);
            }
        }
    }

    let rotation = nearest_rotation(&cov);
    let mut rotated_mean = [0.0; 3];
    mat3::mat33_mul_vec3(&rotation, &src_mean, &mut rotated_mean);
    let translation = [
        dst_mean[0] - rotated_mean[0],
        dst_mean[1] - rotated_mean[1],
        dst_mean[2] - rotated_mean[2],
    ];

    Ok(RigidTransform {
        rotation,
        translation,
    })
}

/// Robustly fit a rigid transform with RANSAC.
///
/// Runs a fixed number of iterations (30 by default), each sampling three
/// distinct correspondences, fitting the closed form and scoring all points
/// by transformed residual magnitude against `params.inlier_threshold`. The
/// best model's inliers feed a final refit only when more than six survive;
/// otherwise the fit fails.
pub fn fit_rigid_ransac(
    src: &[[f64; 3]],
    dst: &[[f64; 3]],
    params: &RansacParams,
) -> Result<RigidRansacResult, RegisterError> {
    if src.len() != dst.len() {
        return Err(RegisterError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }
    if src.len() < MIN_RIGID_POINTS {
        return Err(RegisterError::InsufficientCorrespondences {
            required: MIN_RIGID_POINTS,
            actual: src.len(),
        });
    }

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut indices: Vec<usize> = (0..src.len()).collect();
    let mut best_inliers: Vec<usize> = Vec::new();

    for _ in 0..params.max_iterations {
        indices.shuffle(&mut rng);
        let sample = &indices[..MIN_RIGID_POINTS];

        let s_min: Vec<[f64; 3]> = sample.iter().map(|&i| src[i]).collect();
        let d_min: Vec<[f64; 3]> = sample.iter().map(|&i| dst[i]).collect();

        let candidate = match fit_rigid(&s_min, &d_min) {
            Ok(t) => t,
            Err(_) => continue,
        };

        let inliers = classify_inliers(&candidate, src, dst, params.inlier_threshold);
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
        }
    }

    if best_inliers.len() < MIN_RIGID_INLIERS {
        return Err(RegisterError::InsufficientInliers {
            required: MIN_RIGID_INLIERS,
            actual: best_inliers.len(),
        });
    }

    let src_in: Vec<[f64; 3]> = best_inliers.iter().map(|&i| src[i]).collect();
    let dst_in: Vec<[f64; 3]> = best_inliers.iter().map(|&i| dst[i]).collect();
    let transform = fit_rigid(&src_in, &dst_in)?;

    log::debug!(
        "rigid ransac: {} / {} inliers",
        best_inliers.len(),
        src.len()
    );

    Ok(RigidRansacResult {
        transform,
        inliers: best_inliers,
    })
}

fn classify_inliers(
    transform: &RigidTransform,
    src: &[[f64; 3]],
    dst: &[[f64; 3]],
    threshold: f64,
) -> Vec<usize> {
    src.iter()
        .zip(dst.iter())
        .enumerate()
        .filter(|(_, (s, d))| {
            let p = transform.apply(s);
            let dx = p[0] - d[0];
            let dy = p[1] - d[1];
            let dz = p[2] - d[2];
            (dx * dx + dy * dy + dz * dz).sqrt() < threshold
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use landmark_linalg::mat3::axis_angle_to_rotation;

    fn spread_points(n: usize) -> Vec<[f64; 3]> {
        (0..n)
            .map(|i| {
                let x = (i % 5) as f64 * 3.0;
                let y = (i / 5) as f64 * 2.0;
                [x, y, (x * 0.7 + y * y * 0.1).sin() * 4.0]
            })
            .collect()
    }

    fn assert_transform_eq(a: &RigidTransform, b: &RigidTransform, epsilon: f64) {
        for i in 0..3 {
            assert_relative_eq!(a.translation[i], b.translation[i], epsilon = epsilon);
            for j in 0..3 {
                assert_relative_eq!(a.rotation[i][j], b.rotation[i][j], epsilon = epsilon);
            }
        }
    }

    fn known_transform() -> RigidTransform {
        RigidTransform {
            rotation: axis_angle_to_rotation(&[0.1, 0.8, 0.3], 0.25).unwrap(),
            translation: [1.5, -2.0, 0.75],
        }
    }

    #[test]
    fn test_fit_rigid_identity() -> Result<(), RegisterError> {
        let points = spread_points(10);
        let fitted = fit_rigid(&points, &points)?;
        assert_transform_eq(&fitted, &RigidTransform::identity(), 1e-9);
        Ok(())
    }

    #[test]
    fn test_fit_rigid_known_transform() -> Result<(), RegisterError> {
        let src = spread_points(12);
        let expected = known_transform();
        let dst: Vec<[f64; 3]> = src.iter().map(|p| expected.apply(p)).collect();
        let fitted = fit_rigid(&src, &dst)?;
        assert_transform_eq(&fitted, &expected, 1e-9);
        Ok(())
    }

    #[test]
    fn test_fit_rigid_too_few_points() {
        let points = spread_points(2);
        assert!(matches!(
            fit_rigid(&points, &points),
            Err(RegisterError::InsufficientCorrespondences { required: 3, .. })
        ));
    }

    #[test]
    fn test_compose_inverse() {
        let t = known_transform();
        let roundtrip = t.inverse().compose(&t);
        assert_transform_eq(&roundtrip, &RigidTransform::identity(), 1e-12);
    }

    #[test]
    fn test_ransac_rejects_outliers() -> Result<(), RegisterError> {
        let src = spread_points(20);
        let expected = known_transform();
        let mut dst: Vec<[f64; 3]> = src.iter().map(|p| expected.apply(p)).collect();
        // corrupt five correspondences
        for d in dst.iter_mut().skip(15) {
            d[0] += 40.0;
            d[2] -= 25.0;
        }

        let params = RansacParams {
            max_iterations: 30,
            inlier_threshold: 0.5,
            random_seed: Some(3),
        };
        let result = fit_rigid_ransac(&src, &dst, &params)?;
        assert!(result.inliers.len() >= 15);
        assert!(result.inliers.iter().all(|&i| i < 15));
        assert_transform_eq(&result.transform, &expected, 1e-6);
        Ok(())
    }

    #[test]
    fn test_ransac_minimum_inlier_gate() {
        let expected = known_transform();

        // six consistent points: one short of the gate, must fail
        let src6 = spread_points(6);
        let dst6: Vec<[f64; 3]> = src6.iter().map(|p| expected.apply(p)).collect();
        let params = RansacParams {
            max_iterations: 30,
            inlier_threshold: 0.5,
            random_seed: Some(5),
        };
        let result = fit_rigid_ransac(&src6, &dst6, &params);
        assert!(matches!(
            result,
            Err(RegisterError::InsufficientInliers {
                required: 7,
                actual: 6
            })
        ));

        // seven consistent points pass the gate
        let src7 = spread_points(7);
        let dst7: Vec<[f64; 3]> = src7.iter().map(|p| expected.apply(p)).collect();
        let result = fit_rigid_ransac(&src7, &dst7, &params).unwrap();
        assert_eq!(result.inliers.len(), 7);
    }
}
