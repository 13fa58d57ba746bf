//! Projective transform estimation from 2D point correspondences.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use landmark_linalg::mat3;

use crate::error::RegisterError;
use crate::params::RansacParams;

/// Threshold below which the homogeneous w coordinate is treated as zero.
const TRANSFER_W_EPS: f64 = 1e-12;

/// Minimum correspondences for a direct homography solve.
pub const MIN_HOMOGRAPHY_POINTS: usize = 4;

/// Result of a robust homography fit.
#[derive(Debug, Clone)]
pub struct HomographyRansacResult {
    /// The fitted homography matrix, normalized so the bottom-right element
    /// is 1 when well-scaled.
    pub homography: [[f64; 3]; 3],
    /// Indices of the correspondences used in the final refit.
    pub inliers: Vec<usize>,
}

/// Apply a homography to a 2D point in homogeneous coordinates.
///
/// Returns an error when the transferred w coordinate is near zero; the
/// transfer is undefined there and never propagates `inf`/`NaN`.
pub fn apply_homography(h: &[[f64; 3]; 3], p: &[f64; 2]) -> Result<[f64; 2], RegisterError> {
    let hp = [p[0], p[1], 1.0];
    let mut out = [0.0; 3];
    mat3::mat33_mul_vec3(h, &hp, &mut out);
    if out[2].abs() < TRANSFER_W_EPS {
        return Err(RegisterError::DegenerateTransfer);
    }
    Ok([out[0] / out[2], out[1] / out[2]])
}

/// Euclidean reprojection error of a correspondence under a homography.
pub fn reprojection_error(
    h: &[[f64; 3]; 3],
    src: &[f64; 2],
    dst: &[f64; 2],
) -> Result<f64, RegisterError> {
    let projected = apply_homography(h, src)?;
    let dx = projected[0] - dst[0];
    let dy = projected[1] - dst[1];
    Ok((dx * dx + dy * dy).sqrt())
}

/// Compute the homography matrix from 2D point correspondences.
///
/// Builds the standard DLT system (two rows per correspondence, 9 unknowns
/// fixed up to scale) and takes the singular vector of the smallest singular
/// value. Requires at least four non-degenerate pairs.
///
/// # Arguments
///
/// * `src` - The source 2D points.
/// * `dst` - The destination 2D points, parallel to `src`.
///
/// # Returns
///
/// The homography matrix mapping src to dst.
pub fn homography_from_points(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<[[f64; 3]; 3], RegisterError> {
    if src.len() != dst.len() {
        return Err(RegisterError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }
    if src.len() < MIN_HOMOGRAPHY_POINTS {
        return Err(RegisterError::InsufficientCorrespondences {
            required: MIN_HOMOGRAPHY_POINTS,
            actual: src.len(),
        });
    }

    // construct matrix A
    let mut mat_a = faer::Mat::<f64>::zeros(2 * src.len(), 9);
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        mat_a.write(2 * i, 0, s[0]);
        mat_a.write(2 * i, 1, s[1]);
        mat_a.write(2 * i, 2, 1.0);
        mat_a.write(2 * i, 6, -d[0] * s[0]);
        mat_a.write(2 * i, 7, -d[0] * s[1]);
        mat_a.write(2 * i, 8, -d[0]);

        mat_a.write(2 * i + 1, 3, s[0]);
        mat_a.write(2 * i + 1, 4, s[1]);
        mat_a.write(2 * i + 1, 5, 1.0);
        mat_a.write(2 * i + 1, 6, -d[1] * s[0]);
        mat_a.write(2 * i + 1, 7, -d[1] * s[1]);
        mat_a.write(2 * i + 1, 8, -d[1]);
    }

    // solve -> h: 9x1, the right singular vector of the smallest singular value
    let svd = mat_a.svd();
    let h = svd.v().col(8);

    let mut homo = [
        [h[0], h[1], h[2]],
        [h[3], h[4], h[5]],
        [h[6], h[7], h[8]],
    ];
    mat3::normalize_mat33_inplace(&mut homo);

    if mat3::det_mat33(&homo).abs() < 1e-8 {
        return Err(RegisterError::SingularHomography);
    }

    Ok(homo)
}

/// Robustly fit a homography with RANSAC.
///
/// Runs a fixed number of iterations, each sampling four correspondences,
/// fitting a candidate and counting inliers under
/// `params.inlier_threshold`. The best candidate's inliers feed a final
/// all-inlier refit whose inlier set is returned.
pub fn homography_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    params: &RansacParams,
) -> Result<HomographyRansacResult, RegisterError> {
    if src.len() != dst.len() {
        return Err(RegisterError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }
    if src.len() < MIN_HOMOGRAPHY_POINTS {
        return Err(RegisterError::InsufficientCorrespondences {
            required: MIN_HOMOGRAPHY_POINTS,
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
        let sample = &indices[..MIN_HOMOGRAPHY_POINTS];

        let mut s_min = [[0.0; 2]; MIN_HOMOGRAPHY_POINTS];
        let mut d_min = [[0.0; 2]; MIN_HOMOGRAPHY_POINTS];
        for (k, &idx) in sample.iter().enumerate() {
            s_min[k] = src[idx];
            d_min[k] = dst[idx];
        }

        let candidate = match homography_from_points(&s_min, &d_min) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let inliers = classify_inliers(&candidate, src, dst, params.inlier_threshold);
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
        }
    }

    if best_inliers.len() < MIN_HOMOGRAPHY_POINTS {
        return Err(RegisterError::InsufficientInliers {
            required: MIN_HOMOGRAPHY_POINTS,
            actual: best_inliers.len(),
        });
    }

    // final refit on all inliers of the best candidate
    let src_in: Vec<[f64; 2]> = best_inliers.iter().map(|&i| src[i]).collect();
    let dst_in: Vec<[f64; 2]> = best_inliers.iter().map(|&i| dst[i]).collect();
    let homography = homography_from_points(&src_in, &dst_in)?;

    log::debug!(
        "homography ransac: {} / {} inliers",
        best_inliers.len(),
        src.len()
    );

    Ok(HomographyRansacResult {
        homography,
        inliers: best_inliers,
    })
}

fn classify_inliers(
    h: &[[f64; 3]; 3],
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    threshold: f64,
) -> Vec<usize> {
    src.iter()
        .zip(dst.iter())
        .enumerate()
        .filter(|(_, (s, d))| matches!(reprojection_error(h, s, d), Ok(err) if err < threshold))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const H_TRUE: [[f64; 3]; 3] = [
        [1.1, 0.02, 5.0],
        [-0.01, 0.95, -3.0],
        [1e-4, -2e-4, 1.0],
    ];

    fn project(h: &[[f64; 3]; 3], p: &[f64; 2]) -> [f64; 2] {
        apply_homography(h, p).unwrap()
    }

    #[test]
    fn test_four_point_roundtrip() -> Result<(), RegisterError> {
        let src = [[0.0, 0.0], [100.0, 0.0], [0.0, 100.0], [100.0, 100.0]];
        let dst: Vec<[f64; 2]> = src.iter().map(|p| project(&H_TRUE, p)).collect();
        let h = homography_from_points(&src, &dst)?;

        for p in &src {
            let q = project(&h, p);
            let q_true = project(&H_TRUE, p);
            assert_relative_eq!(q[0], q_true[0], epsilon = 1e-6);
            assert_relative_eq!(q[1], q_true[1], epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_identity_from_many_points() -> Result<(), RegisterError> {
        let src: Vec<[f64; 2]> = (0..20)
            .map(|i| [(i % 5) as f64 * 13.0, (i / 5) as f64 * 17.0])
            .collect();
        let h = homography_from_points(&src, &src)?;
        let expected = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(h[i][j], expected[i][j], epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_insufficient_points() {
        let src = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let result = homography_from_points(&src, &src);
        assert!(matches!(
            result,
            Err(RegisterError::InsufficientCorrespondences { required: 4, .. })
        ));
    }

    #[test]
    fn test_degenerate_transfer() {
        // maps the origin to the line at infinity
        let h = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let result = apply_homography(&h, &[0.0, 0.0]);
        assert!(matches!(result, Err(RegisterError::DegenerateTransfer)));
    }

    #[test]
    fn test_ransac_rejects_outliers() -> Result<(), RegisterError> {
        let src: Vec<[f64; 2]> = (0..30)
            .map(|i| [(i % 6) as f64 * 20.0, (i / 6) as f64 * 20.0])
            .collect();
        let mut dst: Vec<[f64; 2]> = src.iter().map(|p| project(&H_TRUE, p)).collect();
        // corrupt ten correspondences with gross errors
        for (k, d) in dst.iter_mut().skip(20).enumerate() {
            d[0] += 300.0 + k as f64 * 11.0;
            d[1] -= 250.0;
        }

        let params = RansacParams {
            max_iterations: 200,
            inlier_threshold: 1.0,
            random_seed: Some(42),
        };
        let result = homography_ransac(&src, &dst, &params)?;
        assert!(result.inliers.len() >= 20);
        assert!(result.inliers.iter().all(|&i| i < 20));

        for p in src.iter().take(20) {
            let q = project(&result.homography, p);
            let q_true = project(&H_TRUE, p);
            assert_relative_eq!(q[0], q_true[0], epsilon = 1e-4);
            assert_relative_eq!(q[1], q_true[1], epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_ransac_inlier_count_reported() -> Result<(), RegisterError> {
        let src: Vec<[f64; 2]> = (0..12)
            .map(|i| [(i % 4) as f64 * 30.0, (i / 4) as f64 * 30.0])
            .collect();
        let dst: Vec<[f64; 2]> = src.iter().map(|p| project(&H_TRUE, p)).collect();
        let params = RansacParams {
            max_iterations: 50,
            inlier_threshold: 1.0,
            random_seed: Some(7),
        };
        let result = homography_ransac(&src, &dst, &params)?;
        assert_eq!(result.inliers.len(), 12);
        Ok(())
    }
}
